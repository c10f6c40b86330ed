// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Bookkeeping for suspended tasks.
//!
//! Every suspended task has exactly one [WaitEntry]. I/O waits are also indexed by object, with one slot per
//! direction, so that a readiness event finds its waiter without scanning. Readiness that arrives while nobody waits
//! in that direction is cached on the object and handed to the next wait.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    engine::{
        ReadyEntry,
        Resume,
    },
    fail::Fail,
    poller::{
        Poller,
        PollerEntry,
        PollerEvent,
        PollerObject,
        Registration,
    },
    scheduler::TaskId,
    sync::Lock,
    timer::{
        Timer,
        TimerId,
    },
};
use ::libc::pid_t;
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    os::fd::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Why a task is suspended.
pub enum WaitReason {
    Socket { fd: RawFd, events: PollerEvent },
    Pipe { fd: RawFd, events: PollerEvent },
    Process(pid_t),
    /// Pure sleep.
    Timer,
    Lock(Lock),
}

/// A suspended task and what it waits for.
pub struct WaitEntry {
    pub task: TaskId,
    pub reason: WaitReason,
    timer: Option<TimerId>,
}

/// Per-object waiters and readiness cache.
#[derive(Default)]
struct ObjectState {
    recv: Option<TaskId>,
    send: Option<TaskId>,
    // Directions the poller registration currently asks for.
    armed: PollerEvent,
    // Readiness reported while nobody waited for it.
    cached: PollerEvent,
    registration: Option<Registration>,
}

struct ProcessWait {
    task: TaskId,
    registration: Registration,
}

/// Map from waitable objects and timers to the tasks suspended on them.
pub struct WaitTable {
    entries: HashMap<TaskId, WaitEntry>,
    objects: HashMap<PollerObject, ObjectState>,
    processes: HashMap<pid_t, ProcessWait>,
    // Zero-timeout waits, resolved by the next poll.
    polls: Vec<TaskId>,
    timer: Timer,
    edge_triggered: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WaitReason {
    fn object(&self) -> Option<PollerObject> {
        match self {
            WaitReason::Socket { fd, .. } => Some(PollerObject::Socket(*fd)),
            WaitReason::Pipe { fd, .. } => Some(PollerObject::Pipe(*fd)),
            WaitReason::Process(pid) => Some(PollerObject::Process(*pid)),
            WaitReason::Timer | WaitReason::Lock(_) => None,
        }
    }

    /// Directions of an I/O wait.
    fn events(&self) -> PollerEvent {
        match self {
            WaitReason::Socket { events, .. } | WaitReason::Pipe { events, .. } => *events,
            _ => PollerEvent::empty(),
        }
    }
}

impl ObjectState {
    /// Directions that somebody is waiting for.
    fn waited(&self) -> PollerEvent {
        let mut events: PollerEvent = PollerEvent::empty();
        if self.recv.is_some() {
            events |= PollerEvent::RECV;
        }
        if self.send.is_some() {
            events |= PollerEvent::SEND;
        }
        events
    }

    fn forget(&mut self, task: TaskId) {
        if self.recv == Some(task) {
            self.recv = None;
        }
        if self.send == Some(task) {
            self.send = None;
        }
    }
}

impl WaitTable {
    pub fn new(now: u64, edge_triggered: bool) -> Self {
        Self {
            entries: HashMap::new(),
            objects: HashMap::new(),
            processes: HashMap::new(),
            polls: Vec::new(),
            timer: Timer::new(now),
            edge_triggered,
        }
    }

    /// Number of suspended tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.entries.contains_key(&task)
    }

    /// Checks if some suspended task can be woken by the poller.
    pub fn has_poller_waiters(&self) -> bool {
        !self.processes.is_empty() || self.objects.values().any(|state| !state.waited().is_empty())
    }

    /// Checks if some zero-timeout wait needs a poll.
    pub fn has_polls(&self) -> bool {
        !self.polls.is_empty()
    }

    pub fn timer_mut(&mut self) -> &mut Timer {
        &mut self.timer
    }

    /// Milliseconds until the next timer fires.
    pub fn delay(&mut self) -> Option<u64> {
        self.timer.delay()
    }

    /// Suspends `task` until `object` is ready for `events`.
    ///
    /// Returns the ready events at once if they were cached, `None` once the task is recorded as waiting, or a
    /// failure: EIO for a cached error, EBUSY if another task already waits for the same direction.
    ///
    /// A zero timeout still registers the object, so the poller gets one look at it. Whatever that poll does not
    /// report fails with ETIMEDOUT in [WaitTable::expire_polls].
    pub fn wait_io(
        &mut self,
        poller: &mut dyn Poller,
        task: TaskId,
        object: PollerObject,
        events: PollerEvent,
        timeout: i64,
    ) -> Result<Option<PollerEvent>, Fail> {
        let events: PollerEvent = events.directions();
        let reason: WaitReason = match object {
            PollerObject::Socket(fd) => WaitReason::Socket { fd, events },
            PollerObject::Pipe(fd) => WaitReason::Pipe { fd, events },
            PollerObject::Process(_) => return Err(Fail::new(libc::EINVAL, "use wait_proc for processes")),
        };
        if events.is_empty() {
            return Err(Fail::new(libc::EINVAL, "no events to wait for"));
        }

        let edge: bool = self.edge_triggered;
        let state: &mut ObjectState = self.objects.entry(object).or_default();

        // Readiness that nobody consumed yet.
        if state.cached.contains(PollerEvent::ERROR) {
            state.cached = PollerEvent::empty();
            debug!("wait_io(): cached error for object={:?}", object);
            return Err(Fail::new(libc::EIO, "object reported an error"));
        }
        let cached: PollerEvent = state.cached & events;
        if !cached.is_empty() {
            let eof: PollerEvent = state.cached & PollerEvent::EOF;
            // After a hang-up the object stays ready.
            if eof.is_empty() {
                state.cached.remove(cached);
            }
            debug!("wait_io(): cached events={:?} for object={:?}", cached | eof, object);
            return Ok(Some(cached | eof));
        }

        for (direction, waiter) in [(PollerEvent::RECV, state.recv), (PollerEvent::SEND, state.send)] {
            if events.contains(direction) && waiter.map_or(false, |waiter| waiter != task) {
                let cause: String = format!("another task is waiting on {:?} for {:?}", object, direction);
                error!("wait_io(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            }
        }

        // Keep the directions other tasks still wait for.
        let wanted: PollerEvent = state.waited() | events;
        let mode: PollerEvent = if edge { PollerEvent::CLEAR } else { PollerEvent::ONESHOT };
        let rearm: bool = !edge || !state.armed.contains(wanted) || state.registration.is_none();
        if rearm {
            let registration: Registration = Self::arm(poller, object, state.registration.take(), wanted | mode)?;
            state.registration = Some(registration);
            state.armed = wanted;
        }

        if events.contains(PollerEvent::RECV) {
            state.recv = Some(task);
        }
        if events.contains(PollerEvent::SEND) {
            state.send = Some(task);
        }

        if timeout == 0 {
            self.polls.push(task);
        }
        self.suspend(task, reason, timeout);
        Ok(None)
    }

    /// Suspends `task` until process `pid` exits. Returns its status at once if it already did.
    pub fn wait_proc(
        &mut self,
        poller: &mut dyn Poller,
        task: TaskId,
        pid: pid_t,
        timeout: i64,
    ) -> Result<Option<i32>, Fail> {
        if let Some(status) = poller.reap(pid)? {
            return Ok(Some(status));
        }
        if timeout == 0 {
            return Err(Fail::new(libc::ETIMEDOUT, "process is still running"));
        }
        if let Some(wait) = self.processes.get(&pid) {
            if wait.task != task {
                let cause: String = format!("another task is waiting on process {:?}", pid);
                error!("wait_proc(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            }
        }

        let object: PollerObject = PollerObject::Process(pid);
        let registration: Registration = match self.processes.remove(&pid) {
            Some(wait) => wait.registration,
            None => poller.register(object, PollerEvent::RECV, object.token())?,
        };
        self.processes.insert(pid, ProcessWait { task, registration });
        self.suspend(task, WaitReason::Process(pid), timeout);
        Ok(None)
    }

    /// Suspends `task` for `timeout` milliseconds, forever if negative. Returns false for a zero timeout, in which case
    /// nothing is recorded.
    pub fn sleep(&mut self, task: TaskId, timeout: i64) -> bool {
        if timeout == 0 {
            return false;
        }
        self.suspend(task, WaitReason::Timer, timeout);
        true
    }

    /// Suspends `task` until it is handed `lock`. The task must already be queued on the lock.
    pub fn wait_lock(&mut self, task: TaskId, lock: Lock) {
        self.suspend(task, WaitReason::Lock(lock), -1);
    }

    /// Ends the wait of `task` because what it waited for happened. Object waiter slots are left to the caller.
    pub fn complete(&mut self, task: TaskId) -> Option<WaitEntry> {
        let entry: WaitEntry = self.entries.remove(&task)?;
        if let Some(timer) = entry.timer {
            self.timer.cancel(timer);
        }
        Some(entry)
    }

    /// Drops every trace of `task`: its entry, timer, object slots, lock queue position and, when nobody else waits
    /// on the object, the poller registration.
    pub fn remove(&mut self, poller: &mut dyn Poller, task: TaskId) -> Option<WaitEntry> {
        let entry: WaitEntry = self.complete(task)?;
        match &entry.reason {
            WaitReason::Socket { .. } | WaitReason::Pipe { .. } => {
                if let Some(object) = entry.reason.object() {
                    self.release_object_slot(poller, object, task);
                }
            },
            WaitReason::Process(pid) => {
                if let Some(wait) = self.processes.remove(pid) {
                    if let Err(e) = poller.unregister(wait.registration) {
                        warn!("remove(): pid={:?} {:?}", pid, e);
                    }
                }
            },
            WaitReason::Lock(lock) => {
                lock.remove_waiter(task);
            },
            WaitReason::Timer => {},
        }
        trace!("remove(): task_id={:?}", task);
        Some(entry)
    }

    /// Forgets `object`: drops its cache and registration and fails its waiters with ECANCELED.
    pub fn cancel_io(
        &mut self,
        poller: &mut dyn Poller,
        object: PollerObject,
        ready: &mut VecDeque<ReadyEntry>,
    ) -> Result<(), Fail> {
        let mut waiters: Vec<TaskId> = Vec::new();
        match object {
            PollerObject::Process(pid) => {
                if let Some(wait) = self.processes.remove(&pid) {
                    waiters.push(wait.task);
                    poller.unregister(wait.registration)?;
                }
            },
            _ => {
                if let Some(state) = self.objects.remove(&object) {
                    waiters.extend(state.recv);
                    if state.send != state.recv {
                        waiters.extend(state.send);
                    }
                    if let Some(registration) = state.registration {
                        poller.unregister(registration)?;
                    }
                }
            },
        }

        for task in waiters {
            self.complete(task);
            trace!("cancel_io(): waking task_id={:?} on {:?}", task, object);
            let resume: Resume = match object {
                PollerObject::Process(_) => Resume::Process(Err(Fail::new(libc::ECANCELED, "wait cancelled"))),
                _ => Resume::Io(Err(Fail::new(libc::ECANCELED, "wait cancelled"))),
            };
            ready.push_back(ReadyEntry { task, resume });
        }
        Ok(())
    }

    /// Hands one readiness report to the tasks waiting for it, caching whatever nobody waits for.
    pub fn dispatch(&mut self, event: PollerEntry, ready: &mut VecDeque<ReadyEntry>) {
        if let PollerObject::Process(pid) = event.object {
            // The poller drops process registrations on its own once the exit is reported.
            if let Some(wait) = self.processes.remove(&pid) {
                self.complete(wait.task);
                let result: Result<i32, Fail> = match event.status {
                    Some(status) => Ok(status),
                    None => Err(Fail::new(libc::ECHILD, "cannot collect process status")),
                };
                trace!("dispatch(): pid={:?} exited, waking task_id={:?}", pid, wait.task);
                ready.push_back(ReadyEntry {
                    task: wait.task,
                    resume: Resume::Process(result),
                });
            }
            return;
        }

        let state: &mut ObjectState = match self.objects.get_mut(&event.object) {
            Some(state) => state,
            None => {
                trace!("dispatch(): no state for {:?}", event.object);
                return;
            },
        };

        let mut events: PollerEvent = event.events;
        // A hang-up makes every waited direction ready, now and for the next waits.
        if events.contains(PollerEvent::EOF) {
            events |= state.armed;
            state.cached |= state.armed | PollerEvent::EOF;
        }
        let error: bool = events.contains(PollerEvent::ERROR);

        let co_recv: Option<TaskId> = if events.contains(PollerEvent::RECV) || error {
            state.recv
        } else {
            None
        };
        let co_send: Option<TaskId> = if events.contains(PollerEvent::SEND) || error {
            state.send
        } else {
            None
        };

        let mut woken: Vec<(TaskId, PollerEvent)> = Vec::with_capacity(2);
        if co_recv.is_some() && co_recv == co_send {
            state.recv = None;
            state.send = None;
            woken.extend(co_recv.map(|task| (task, events)));
        } else {
            if let Some(task) = co_recv {
                state.recv = None;
                woken.push((task, events - PollerEvent::SEND));
                events.remove(PollerEvent::RECV);
            }
            if let Some(task) = co_send {
                state.send = None;
                woken.push((task, events - PollerEvent::RECV));
                events.remove(PollerEvent::SEND);
            }
            let mut leftover: PollerEvent = events.directions();
            if error && woken.is_empty() {
                leftover |= PollerEvent::ERROR;
            }
            if !leftover.is_empty() {
                trace!("dispatch(): caching events={:?} for {:?}", leftover, event.object);
                state.cached |= leftover;
            }
        }

        for (task, events) in woken {
            if let Some(entry) = self.complete(task) {
                let result: Result<PollerEvent, Fail> = if events.contains(PollerEvent::ERROR) {
                    Err(Fail::new(libc::EIO, "object reported an error"))
                } else {
                    Ok(events - PollerEvent::ERROR)
                };
                trace!("dispatch(): waking task_id={:?} with {:?}", entry.task, result);
                ready.push_back(ReadyEntry {
                    task: entry.task,
                    resume: Resume::Io(result),
                });
            }
        }
    }

    /// Advances the timer to `now`. Tasks whose wait timed out are made ready in deadline order.
    pub fn expire(&mut self, poller: &mut dyn Poller, now: u64, ready: &mut VecDeque<ReadyEntry>) {
        for task in self.timer.advance_clock(now) {
            let mut entry: WaitEntry = match self.entries.remove(&task) {
                Some(entry) => entry,
                None => continue,
            };
            // The timer that fired is gone already.
            entry.timer = None;

            let resume: Resume = match &entry.reason {
                WaitReason::Timer => Resume::Timer,
                WaitReason::Socket { .. } | WaitReason::Pipe { .. } => self.give_up(task, &entry.reason),
                WaitReason::Process(pid) => {
                    if let Some(wait) = self.processes.remove(pid) {
                        if let Err(e) = poller.unregister(wait.registration) {
                            warn!("expire(): pid={:?} {:?}", pid, e);
                        }
                    }
                    Resume::Process(Err(Fail::new(libc::ETIMEDOUT, "wait timed out")))
                },
                // Lock waits never carry a timer.
                WaitReason::Lock(_) => continue,
            };
            trace!("expire(): task_id={:?} timed out", task);
            ready.push_back(ReadyEntry { task, resume });
        }
    }

    /// Fails the zero-timeout waits that the last poll did not satisfy.
    pub fn expire_polls(&mut self, ready: &mut VecDeque<ReadyEntry>) {
        for task in std::mem::take(&mut self.polls) {
            // Woken or removed since.
            let entry: WaitEntry = match self.entries.remove(&task) {
                Some(entry) => entry,
                None => continue,
            };
            let resume: Resume = self.give_up(task, &entry.reason);
            trace!("expire_polls(): task_id={:?} found nothing ready", task);
            ready.push_back(ReadyEntry { task, resume });
        }
    }

    /// Frees the object slots of an I/O wait that ran out of time.
    fn give_up(&mut self, task: TaskId, reason: &WaitReason) -> Resume {
        if let Some(object) = reason.object() {
            if let Some(state) = self.objects.get_mut(&object) {
                state.forget(task);
            }
            trace!("give_up(): task_id={:?} {:?} for {:?}", task, object, reason.events());
        }
        Resume::Io(Err(Fail::new(libc::ETIMEDOUT, "wait timed out")))
    }

    fn suspend(&mut self, task: TaskId, reason: WaitReason, timeout: i64) {
        let timer: Option<TimerId> = (timeout > 0).then(|| self.timer.post_task(task, timeout as u64));
        self.entries.insert(task, WaitEntry { task, reason, timer });
    }

    fn release_object_slot(&mut self, poller: &mut dyn Poller, object: PollerObject, task: TaskId) {
        let idle: bool = match self.objects.get_mut(&object) {
            Some(state) => {
                state.forget(task);
                state.waited().is_empty()
            },
            None => false,
        };
        if idle {
            if let Some(state) = self.objects.remove(&object) {
                if let Some(registration) = state.registration {
                    if let Err(e) = poller.unregister(registration) {
                        warn!("release_object_slot(): {:?} {:?}", object, e);
                    }
                }
            }
        }
    }

    /// Registers `object`, or changes an existing registration. Falls back between the two when the poller disagrees
    /// about whether the object is known, which happens when a descriptor number is reused.
    fn arm(
        poller: &mut dyn Poller,
        object: PollerObject,
        registration: Option<Registration>,
        events: PollerEvent,
    ) -> Result<Registration, Fail> {
        let opaque: u64 = object.token();
        match registration {
            Some(registration) => match poller.modify(&registration, events, opaque) {
                Ok(()) => Ok(registration),
                Err(e) if e.errno == libc::ENOENT => {
                    debug!("arm(): {:?} vanished, registering again", object);
                    poller.register(object, events, opaque)
                },
                Err(e) => Err(e),
            },
            None => match poller.register(object, events, opaque) {
                Ok(registration) => Ok(registration),
                Err(e) if e.errno == libc::EEXIST => {
                    debug!("arm(): {:?} already known, modifying", object);
                    let registration: Registration = Registration::new(object);
                    poller.modify(&registration, events, opaque)?;
                    Ok(registration)
                },
                Err(e) => Err(e),
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
