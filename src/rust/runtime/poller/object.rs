// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libc::pid_t;
use ::std::os::fd::RawFd;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Something a task can wait on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollerObject {
    Socket(RawFd),
    Pipe(RawFd),
    /// A child process, waited on for its exit.
    Process(pid_t),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PollerObject {
    /// Default opaque value for a registration: unique among live objects.
    pub fn token(&self) -> u64 {
        match self {
            PollerObject::Socket(fd) | PollerObject::Pipe(fd) => *fd as u32 as u64,
            PollerObject::Process(pid) => (1 << 32) | (*pid as u32 as u64),
        }
    }

    /// The descriptor of a socket or pipe.
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            PollerObject::Socket(fd) | PollerObject::Pipe(fd) => Some(*fd),
            PollerObject::Process(_) => None,
        }
    }
}
