// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    cell::Cell,
    rc::Rc,
    time::Instant,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Monotonic millisecond time source used for every deadline computed by a scheduler.
pub trait ClockSource {
    /// Milliseconds elapsed since an arbitrary, fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Wall clock backed by [Instant].
pub struct MonotonicClock {
    origin: Instant,
}

/// Virtual clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl SimClock {
    /// Moves virtual time forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.0.set(self.0.get() + delta_ms);
    }

    /// Moves virtual time forward to `now_ms`. Earlier instants are ignored.
    pub fn advance_to(&self, now_ms: u64) {
        if now_ms > self.0.get() {
            self.0.set(now_ms);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl ClockSource for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
