// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// PAL: Platform Abstraction Layer
//======================================================================================================================

// This is the platform abstraction layer that wraps the non-blocking primitives a task performs before it suspends.
// Every primitive reports "would block" as a failure with EAGAIN, never as a short result, so the cooperative wrappers
// in the schedulers can tell it apart from end of file.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod notifier;
        pub mod pipe;
        pub mod process;
        pub mod socket;
    } else {
        compile_error!("epoll and pidfd are only available on Linux");
    }
}

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::{
    EAGAIN,
    EALREADY,
    EINPROGRESS,
    EWOULDBLOCK,
};
use ::std::io;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Checks if an operation that failed with `errno` should be retried once the object becomes ready.
pub fn should_retry(errno: i32) -> bool {
    errno == EAGAIN || errno == EWOULDBLOCK || errno == EINPROGRESS || errno == EALREADY
}

/// Converts the failure of a non-blocking primitive, folding every "not done yet" code into EAGAIN.
pub fn io_failure(e: io::Error, cause: &str) -> Fail {
    match e.raw_os_error() {
        Some(errno) if should_retry(errno) => Fail::new(EAGAIN, "operation not complete yet"),
        Some(errno) => Fail::new(errno, cause),
        None => Fail::from(e),
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
