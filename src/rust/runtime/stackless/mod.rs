// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Stackless scheduler.
//!
//! Tasks share the stack of the thread that runs the scheduler. Each one is a [LoRoutine], stepped whenever what it
//! waits for happens.

mod context;
mod routine;
mod scheduler;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    context::LoContext,
    routine::{
        routine,
        FnRoutine,
        LoRoutine,
        Step,
    },
    scheduler::LoScheduler,
};
