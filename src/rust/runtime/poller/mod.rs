// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Readiness polling.
//!
//! A [Poller] wraps an OS readiness facility. Objects are registered with an event mask and an opaque value, and
//! [Poller::wait] blocks the calling thread until at least one registered object is ready or the timeout elapses.
//! Readiness is edge-consumed: an event reported once is not reported again until the condition re-occurs (edge
//! mode) or the object is re-armed (oneshot mode).

mod epoll;
mod object;
mod sim;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    epoll::EpollPoller,
    object::PollerObject,
    sim::SimPoller,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::notifier::Notifier,
    runtime::fail::Fail,
};
use ::bitflags::bitflags;
use ::libc::pid_t;
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

bitflags! {
    /// Readiness events, both requested and reported.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PollerEvent: u16 {
        /// Readable.
        const RECV = 0x0001;
        /// Writable.
        const SEND = 0x0002;
        /// Keep the registration across events and report transitions only.
        const CLEAR = 0x0010;
        /// Disarm the registration after one event.
        const ONESHOT = 0x0020;
        /// The peer hung up.
        const EOF = 0x0100;
        /// The object is in an error state.
        const ERROR = 0x0200;

        /// A listening socket has a pending connection.
        const ACCEPT = Self::RECV.bits();
        /// An asynchronous connect finished.
        const CONNECT = Self::SEND.bits();
    }
}

/// One ready object returned by [Poller::wait].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollerEntry {
    pub object: PollerObject,
    pub opaque: u64,
    pub events: PollerEvent,
    /// Exit status of a process object. `None` for sockets and pipes, or if the status could not be collected.
    pub status: Option<i32>,
}

/// Proof that an object is registered, consumed by [Poller::unregister].
#[derive(Debug, PartialEq, Eq)]
pub struct Registration {
    object: PollerObject,
}

/// Wakes a poller blocked in [Poller::wait] from any thread.
#[derive(Clone)]
pub struct PollerWaker(Arc<Notifier>);

//======================================================================================================================
// Traits
//======================================================================================================================

/// OS readiness-notification facility.
pub trait Poller {
    /// Checks if the backend honours the given mode flags ([PollerEvent::CLEAR], [PollerEvent::ONESHOT]).
    fn supports(&self, events: PollerEvent) -> bool;

    /// Starts watching `object` for `events`. Registering an object twice fails with EEXIST.
    fn register(&mut self, object: PollerObject, events: PollerEvent, opaque: u64) -> Result<Registration, Fail>;

    /// Changes what a registered object is watched for. Fails with ENOENT if the backend no longer knows it.
    fn modify(&mut self, registration: &Registration, events: PollerEvent, opaque: u64) -> Result<(), Fail>;

    /// Stops watching an object.
    fn unregister(&mut self, registration: Registration) -> Result<(), Fail>;

    /// Blocks until something is ready or `timeout_ms` elapses (`0` polls, `-1` waits forever). Ready objects are
    /// appended to `buffer`, at most `max_events` of them. Returns how many were appended.
    ///
    /// A process object is reaped and dropped from the poller when its exit is reported.
    fn wait(&mut self, buffer: &mut Vec<PollerEntry>, max_events: usize, timeout_ms: i64) -> Result<usize, Fail>;

    /// Reaps `pid` without blocking, `None` if it is still running.
    fn reap(&mut self, pid: pid_t) -> Result<Option<i32>, Fail>;

    /// Handle that interrupts a blocked [Poller::wait].
    fn waker(&self) -> PollerWaker;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Registration {
    pub(crate) fn new(object: PollerObject) -> Self {
        Self { object }
    }

    pub fn object(&self) -> PollerObject {
        self.object
    }
}

impl PollerWaker {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        Self(notifier)
    }

    /// Interrupts the poller. A wake-up that arrives while the poller is not waiting makes its next wait return at
    /// once.
    pub fn spak(&self) -> Result<(), Fail> {
        self.0.notify()
    }
}

impl PollerEvent {
    /// The direction bits.
    pub fn directions(self) -> PollerEvent {
        self & (PollerEvent::RECV | PollerEvent::SEND)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
