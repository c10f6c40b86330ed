// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod stack;
mod stackful;
mod task;
mod yielder;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    stackful::Scheduler,
    task::{
        TaskId,
        TaskState,
    },
    yielder::Yielder,
};
pub use crate::runtime::engine::RemoteHandle;
