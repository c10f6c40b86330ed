// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    poller::PollerObject,
};
use ::std::{
    fs::File,
    io::{
        Read,
        Write,
    },
    os::fd::{
        AsRawFd,
        FromRawFd,
        OwnedFd,
        RawFd,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Event counter that any thread can bump and that a poller reports as readable while it is non-zero.
pub struct Notifier {
    file: File,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Notifier {
    pub fn new() -> Result<Self, Fail> {
        let fd: RawFd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            let fail: Fail = Fail::last_os_error("failed to create eventfd");
            error!("new(): {:?}", fail);
            return Err(fail);
        }
        // Safety: the descriptor was just created and is owned by nobody else.
        let fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { file: File::from(fd) })
    }

    /// Makes the notifier readable.
    pub fn notify(&self) -> Result<(), Fail> {
        match (&self.file).write(&1u64.to_ne_bytes()) {
            Ok(_) => Ok(()),
            Err(e) => {
                let fail: Fail = Fail::from(e);
                // The counter is saturated, so it is readable anyway.
                if fail.is_would_block() {
                    return Ok(());
                }
                warn!("notify(): {:?}", fail);
                Err(fail)
            },
        }
    }

    /// Resets the notifier. Returns the number of notifications collapsed into the reset.
    pub fn drain(&self) -> u64 {
        let mut buf: [u8; 8] = [0; 8];
        match (&self.file).read(&mut buf) {
            Ok(8) => u64::from_ne_bytes(buf),
            _ => 0,
        }
    }

    /// The notifier as a waitable object.
    pub fn object(&self) -> PollerObject {
        PollerObject::Pipe(self.file.as_raw_fd())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
