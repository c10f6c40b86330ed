// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal,
    runtime::{
        fail::Fail,
        poller::PollerObject,
    },
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

/// Read end of a non-blocking anonymous pipe.
pub struct PipeReader(File);

/// Write end of a non-blocking anonymous pipe.
pub struct PipeWriter(File);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates an anonymous pipe with both ends in non-blocking mode.
pub fn pipe() -> Result<(PipeReader, PipeWriter), Fail> {
    let mut fds: [RawFd; 2] = [-1; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } != 0 {
        let fail: Fail = Fail::last_os_error("failed to create pipe");
        error!("pipe(): {:?}", fail);
        return Err(fail);
    }
    // Safety: both descriptors were just created and are owned by nobody else.
    let (reader, writer): (OwnedFd, OwnedFd) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((PipeReader(File::from(reader)), PipeWriter(File::from(writer))))
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PipeReader {
    /// Reads into `buf`. `Ok(0)` means the write end was closed; EAGAIN means the pipe is empty.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        (&self.0).read(buf).map_err(|e| pal::io_failure(e, "failed to read pipe"))
    }

    /// The read end as a waitable object.
    pub fn object(&self) -> PollerObject {
        PollerObject::Pipe(self.0.as_raw_fd())
    }
}

impl PipeWriter {
    /// Writes from `buf`. EAGAIN means the pipe is full.
    pub fn try_write(&self, buf: &[u8]) -> Result<usize, Fail> {
        (&self.0).write(buf).map_err(|e| pal::io_failure(e, "failed to write pipe"))
    }

    /// The write end as a waitable object.
    pub fn object(&self) -> PollerObject {
        PollerObject::Pipe(self.0.as_raw_fd())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
