// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    poller::PollerObject,
};
use ::libc::pid_t;
use ::std::{
    os::fd::{
        FromRawFd,
        OwnedFd,
        RawFd,
    },
    process::{
        Child,
        Command,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Child process whose exit is collected through a scheduler instead of [Child::wait].
pub struct Process {
    child: Child,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Process {
    pub fn spawn(command: &mut Command) -> Result<Self, Fail> {
        match command.spawn() {
            Ok(child) => {
                trace!("spawn(): pid={:?}", child.id());
                Ok(Self { child })
            },
            Err(e) => {
                error!("spawn(): failed to spawn process ({:?})", e);
                Err(Fail::from(e))
            },
        }
    }

    pub fn pid(&self) -> pid_t {
        self.child.id() as pid_t
    }

    /// The process as a waitable object.
    pub fn object(&self) -> PollerObject {
        PollerObject::Process(self.pid())
    }

    /// Sends `signal` to the process.
    pub fn signal(&self, signal: i32) -> Result<(), Fail> {
        if unsafe { libc::kill(self.pid(), signal) } != 0 {
            return Err(Fail::last_os_error("failed to signal process"));
        }
        Ok(())
    }

    /// Access to the standard streams and the rest of the child.
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Reaps `pid` without blocking. Returns `None` while it is still running, otherwise its exit status, `-1` if it did
/// not exit normally.
pub fn try_reap(pid: pid_t) -> Result<Option<i32>, Fail> {
    let mut status: libc::c_int = 0;
    match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
        0 => Ok(None),
        r if r == pid => Ok(Some(exit_status(status))),
        _ => {
            let fail: Fail = Fail::last_os_error("failed to wait for process");
            debug!("try_reap(): pid={:?} {:?}", pid, fail);
            Err(fail)
        },
    }
}

/// Opens a descriptor that becomes readable once `pid` exits.
pub fn pidfd_open(pid: pid_t) -> Result<OwnedFd, Fail> {
    let fd: libc::c_long = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if fd < 0 {
        let fail: Fail = Fail::last_os_error("failed to open pidfd");
        warn!("pidfd_open(): pid={:?} {:?}", pid, fail);
        return Err(fail);
    }
    // Safety: the descriptor was just created and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

fn exit_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        -1
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
