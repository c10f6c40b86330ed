// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod clock;
pub mod config;
pub mod fail;
pub mod limits;
pub mod logging;
pub mod poller;
pub mod scheduler;
pub mod stackless;
pub mod sync;
pub mod timer;
pub mod worker;

mod engine;
mod waittable;
