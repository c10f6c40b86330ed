// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod lock;
mod signal;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    lock::Lock,
    signal::WaitSignal,
};
