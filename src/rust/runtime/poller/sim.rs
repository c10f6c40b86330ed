// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::notifier::Notifier,
    runtime::{
        clock::SimClock,
        fail::Fail,
        poller::{
            Poller,
            PollerEntry,
            PollerEvent,
            PollerObject,
            PollerWaker,
            Registration,
        },
    },
};
use ::libc::pid_t;
use ::std::{
    cell::RefCell,
    collections::{
        HashMap,
        VecDeque,
    },
    rc::Rc,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct SimRegistration {
    events: PollerEvent,
    opaque: u64,
    armed: bool,
}

struct PendingEvent {
    object: PollerObject,
    events: PollerEvent,
    status: Option<i32>,
}

struct SimState {
    clock: SimClock,
    registry: HashMap<PollerObject, SimRegistration>,
    pending: VecDeque<PendingEvent>,
    exited: HashMap<pid_t, i32>,
    wait_calls: usize,
    fail_next: Option<Fail>,
}

/// Poller whose readiness is injected by hand and whose waits advance a [SimClock] instead of sleeping.
///
/// Clones share state, so a test keeps one clone to inject events while the scheduler owns another. A wait that finds
/// nothing pending advances virtual time by its timeout, and an infinite wait with nothing pending fails with EDEADLK
/// since nothing could ever end it.
#[derive(Clone)]
pub struct SimPoller {
    state: Rc<RefCell<SimState>>,
    notifier: Arc<Notifier>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SimPoller {
    pub fn new(clock: SimClock) -> Result<Self, Fail> {
        Ok(Self {
            state: Rc::new(RefCell::new(SimState {
                clock,
                registry: HashMap::new(),
                pending: VecDeque::new(),
                exited: HashMap::new(),
                wait_calls: 0,
                fail_next: None,
            })),
            notifier: Arc::new(Notifier::new()?),
        })
    }

    /// Makes `object` ready for `events`. Delivered by the next wait if the object is registered for them.
    pub fn inject(&self, object: PollerObject, events: PollerEvent) {
        self.state.borrow_mut().pending.push_back(PendingEvent {
            object,
            events,
            status: None,
        });
    }

    /// Marks process `pid` as exited with `status`.
    pub fn exit_process(&self, pid: pid_t, status: i32) {
        let mut state = self.state.borrow_mut();
        state.exited.insert(pid, status);
        let object: PollerObject = PollerObject::Process(pid);
        if state.registry.contains_key(&object) {
            state.pending.push_back(PendingEvent {
                object,
                events: PollerEvent::RECV,
                status: Some(status),
            });
        }
    }

    /// Makes the next wait fail with `fail`.
    pub fn fail_next_wait(&self, fail: Fail) {
        self.state.borrow_mut().fail_next = Some(fail);
    }

    pub fn is_registered(&self, object: PollerObject) -> bool {
        self.state.borrow().registry.contains_key(&object)
    }

    pub fn registrations(&self) -> usize {
        self.state.borrow().registry.len()
    }

    /// Number of times [Poller::wait] was called.
    pub fn wait_calls(&self) -> usize {
        self.state.borrow().wait_calls
    }

    /// Number of injected events not delivered yet.
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Poller for SimPoller {
    fn supports(&self, _events: PollerEvent) -> bool {
        true
    }

    fn register(&mut self, object: PollerObject, events: PollerEvent, opaque: u64) -> Result<Registration, Fail> {
        let mut guard = self.state.borrow_mut();
        let state: &mut SimState = &mut guard;
        if state.registry.contains_key(&object) {
            return Err(Fail::new(libc::EEXIST, "object already registered"));
        }
        state.registry.insert(
            object,
            SimRegistration {
                events,
                opaque,
                armed: true,
            },
        );
        // A child that is already gone makes its registration ready at once.
        if let PollerObject::Process(pid) = object {
            if let Some(status) = state.exited.get(&pid) {
                state.pending.push_back(PendingEvent {
                    object,
                    events: PollerEvent::RECV,
                    status: Some(*status),
                });
            }
        }
        Ok(Registration::new(object))
    }

    fn modify(&mut self, registration: &Registration, events: PollerEvent, opaque: u64) -> Result<(), Fail> {
        match self.state.borrow_mut().registry.get_mut(&registration.object()) {
            Some(entry) => {
                entry.events = events;
                entry.opaque = opaque;
                entry.armed = true;
                Ok(())
            },
            None => Err(Fail::new(libc::ENOENT, "object not registered")),
        }
    }

    fn unregister(&mut self, registration: Registration) -> Result<(), Fail> {
        self.state.borrow_mut().registry.remove(&registration.object());
        Ok(())
    }

    fn wait(&mut self, buffer: &mut Vec<PollerEntry>, max_events: usize, timeout_ms: i64) -> Result<usize, Fail> {
        let mut guard = self.state.borrow_mut();
        let state: &mut SimState = &mut guard;
        state.wait_calls += 1;

        if let Some(fail) = state.fail_next.take() {
            return Err(fail);
        }
        if self.notifier.drain() > 0 {
            return Ok(0);
        }

        let mut count: usize = 0;
        let mut kept: VecDeque<PendingEvent> = VecDeque::new();
        while let Some(event) = state.pending.pop_front() {
            if count >= max_events {
                kept.push_back(event);
                continue;
            }
            let object: PollerObject = event.object;
            let (opaque, reported, oneshot): (u64, PollerEvent, bool) = match state.registry.get(&object) {
                Some(entry) if entry.armed => {
                    let reported: PollerEvent = match object {
                        PollerObject::Process(_) => event.events,
                        _ => event.events & (entry.events.directions() | PollerEvent::EOF | PollerEvent::ERROR),
                    };
                    (entry.opaque, reported, entry.events.contains(PollerEvent::ONESHOT))
                },
                // Disarmed oneshot registration: delivered after the next re-arm.
                Some(_) => {
                    kept.push_back(event);
                    continue;
                },
                None => {
                    trace!("wait(): dropping event for unregistered object {:?}", object);
                    continue;
                },
            };
            if reported.is_empty() {
                continue;
            }

            if let PollerObject::Process(pid) = object {
                state.registry.remove(&object);
                state.exited.remove(&pid);
            } else if oneshot {
                if let Some(entry) = state.registry.get_mut(&object) {
                    entry.armed = false;
                }
            }

            buffer.push(PollerEntry {
                object,
                opaque,
                events: reported,
                status: event.status,
            });
            count += 1;
        }
        state.pending = kept;

        if count == 0 {
            if timeout_ms > 0 {
                state.clock.advance(timeout_ms as u64);
            } else if timeout_ms < 0 {
                return Err(Fail::new(libc::EDEADLK, "nothing can wake a simulated infinite wait"));
            }
        }
        Ok(count)
    }

    fn reap(&mut self, pid: pid_t) -> Result<Option<i32>, Fail> {
        Ok(self.state.borrow_mut().exited.remove(&pid))
    }

    fn waker(&self) -> PollerWaker {
        PollerWaker::new(self.notifier.clone())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
