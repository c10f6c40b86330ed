// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Machinery shared by the stackful and the stackless schedulers: the ready queue, the wait table, the poller and the
//! clock, plus one turn of the run loop for when no task is ready.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    clock::ClockSource,
    config::{
        Config,
        PollErrorPolicy,
    },
    fail::Fail,
    poller::{
        Poller,
        PollerEntry,
        PollerEvent,
        PollerObject,
        PollerWaker,
    },
    scheduler::TaskId,
    sync::Lock,
    timer::TimerId,
    waittable::WaitTable,
};
use ::libc::pid_t;
use ::std::{
    collections::VecDeque,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What a task is handed when it runs again.
pub(crate) enum Resume {
    /// First run.
    Start,
    Yield,
    Io(Result<PollerEvent, Fail>),
    Process(Result<i32, Fail>),
    Timer,
    /// Ownership of the lock was handed over.
    Lock(Lock),
    Started(Result<TaskId, Fail>),
    Clock(u64),
    Done(Result<(), Fail>),
}

/// A task in the ready queue.
pub(crate) struct ReadyEntry {
    pub task: TaskId,
    pub resume: Resume,
}

/// What the run loop does after a turn.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Turn {
    Continue,
    Done,
}

pub(crate) struct Engine {
    poller: Box<dyn Poller>,
    clock: Box<dyn ClockSource>,
    waker: PollerWaker,
    pub waits: WaitTable,
    pub ready: VecDeque<ReadyEntry>,
    events: Vec<PollerEntry>,
    capacity: usize,
    policy: PollErrorPolicy,
    retries: usize,
    failures: usize,
    stopped: Arc<AtomicBool>,
    next_task: u64,
}

/// Stops a scheduler from another thread.
#[derive(Clone)]
pub struct RemoteHandle {
    stopped: Arc<AtomicBool>,
    waker: PollerWaker,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    pub fn new(config: &Config, poller: Box<dyn Poller>, clock: Box<dyn ClockSource>) -> Result<Self, Fail> {
        let edge_triggered: bool = config.edge_triggered()?;
        let mode: PollerEvent = if edge_triggered {
            PollerEvent::CLEAR
        } else {
            PollerEvent::ONESHOT
        };
        if !poller.supports(mode) {
            let cause: String = format!("poller does not support {:?} registrations", mode);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::ENOTSUP, &cause));
        }

        let capacity: usize = config.poller_capacity()?;
        let now: u64 = clock.now_ms();
        Ok(Self {
            waker: poller.waker(),
            poller,
            clock,
            waits: WaitTable::new(now, edge_triggered),
            ready: VecDeque::new(),
            events: Vec::with_capacity(capacity),
            capacity,
            policy: config.poll_error_policy()?,
            retries: config.poll_error_retries()?,
            failures: 0,
            stopped: Arc::new(AtomicBool::new(false)),
            next_task: 1,
        })
    }

    /// Hands out a task identifier that was never used before.
    pub fn allocate_task(&mut self) -> TaskId {
        let id: TaskId = TaskId::from(self.next_task);
        self.next_task += 1;
        id
    }

    /// Checks if `task` was ever handed out.
    pub fn was_allocated(&self, task: TaskId) -> bool {
        let id: u64 = task.into();
        id > 0 && id < self.next_task
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn wait_io(
        &mut self,
        task: TaskId,
        object: PollerObject,
        events: PollerEvent,
        timeout: i64,
    ) -> Result<Option<PollerEvent>, Fail> {
        trace!(
            "wait_io(): task_id={:?} object={:?} events={:?} timeout={:?}",
            task,
            object,
            events,
            timeout
        );
        self.waits.wait_io(self.poller.as_mut(), task, object, events, timeout)
    }

    pub fn wait_proc(&mut self, task: TaskId, pid: pid_t, timeout: i64) -> Result<Option<i32>, Fail> {
        trace!("wait_proc(): task_id={:?} pid={:?} timeout={:?}", task, pid, timeout);
        self.waits.wait_proc(self.poller.as_mut(), task, pid, timeout)
    }

    /// Returns false if the task does not need to suspend.
    pub fn sleep(&mut self, task: TaskId, timeout: i64) -> bool {
        trace!("sleep(): task_id={:?} timeout={:?}", task, timeout);
        self.waits.sleep(task, timeout)
    }

    pub fn yield_now(&mut self, task: TaskId) {
        self.ready.push_back(ReadyEntry {
            task,
            resume: Resume::Yield,
        });
    }

    /// Enters `lock` for `task`. Returns false if the task was queued and must suspend.
    pub fn enter(&mut self, task: TaskId, lock: &Lock) -> Result<bool, Fail> {
        if lock.try_enter(task)? {
            return Ok(true);
        }
        trace!("enter(): task_id={:?} waits for the lock", task);
        lock.enqueue(task);
        self.waits.wait_lock(task, lock.clone());
        Ok(false)
    }

    /// Leaves `lock`, handing it to the next waiter.
    pub fn leave(&mut self, task: TaskId, lock: &Lock) -> Result<(), Fail> {
        if let Some(next) = lock.leave(task)? {
            trace!("leave(): task_id={:?} hands the lock to task_id={:?}", task, next);
            self.waits.complete(next);
            self.ready.push_back(ReadyEntry {
                task: next,
                resume: Resume::Lock(lock.clone()),
            });
        }
        Ok(())
    }

    pub fn cancel_io(&mut self, object: PollerObject) -> Result<(), Fail> {
        trace!("cancel_io(): object={:?}", object);
        self.waits.cancel_io(self.poller.as_mut(), object, &mut self.ready)
    }

    /// Drops every trace of `task` from the ready queue and the wait table. A lock handed to `task` that it never
    /// got to see goes on to the next waiter.
    pub fn forget(&mut self, task: TaskId) {
        self.waits.remove(self.poller.as_mut(), task);
        let mut handoffs: Vec<Lock> = Vec::new();
        self.ready.retain(|entry| {
            if entry.task != task {
                return true;
            }
            if let Resume::Lock(lock) = &entry.resume {
                handoffs.push(lock.clone());
            }
            false
        });
        for lock in handoffs {
            trace!("forget(): task_id={:?} passes on a lock it was handed", task);
            if let Err(e) = self.leave(task, &lock) {
                warn!("forget(): task_id={:?} {:?}", task, e);
            }
        }
    }

    pub fn post_timer(&mut self, delay_ms: u64, periodic: bool, callback: Box<dyn FnMut()>) -> TimerId {
        self.waits.timer_mut().post_callback(delay_ms, periodic, callback)
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.waits.timer_mut().cancel(id)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Re-enables the loop once `run` returned.
    pub fn finish(&mut self) {
        self.stopped.store(false, Ordering::Release);
        self.failures = 0;
    }

    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            stopped: self.stopped.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Runs one turn of the loop between two passes over the ready queue: fires expired timers and, if nothing is
    /// ready, waits on the poller until the next timer or the caller's `deadline`.
    ///
    /// In drain mode the loop is done once `tasks` drops to zero, and it fails with EDEADLK if every remaining task
    /// waits for something that can no longer happen.
    pub fn turn(&mut self, drain: bool, deadline: Option<u64>, tasks: usize) -> Result<Turn, Fail> {
        let now: u64 = self.clock.now_ms();
        self.waits.expire(self.poller.as_mut(), now, &mut self.ready);
        if self.is_stopped() {
            trace!("turn(): stopped");
            return Ok(Turn::Done);
        }
        if deadline.map_or(false, |deadline| now >= deadline) {
            trace!("turn(): deadline reached");
            return Ok(Turn::Done);
        }
        // The poller is only waited on when nothing is ready. Zero-timeout waits still get their poll.
        if !self.ready.is_empty() {
            if self.waits.has_polls() {
                self.poll(0)?;
                self.waits.expire_polls(&mut self.ready);
            }
            return Ok(Turn::Continue);
        }
        if drain && tasks == 0 {
            return Ok(Turn::Done);
        }

        let until_timer: Option<u64> = self.waits.delay();
        let until_deadline: Option<u64> = deadline.map(|deadline| deadline - now);
        let timeout: i64 = match (until_timer, until_deadline) {
            _ if self.waits.has_polls() => 0,
            (Some(a), Some(b)) => a.min(b) as i64,
            (Some(a), None) | (None, Some(a)) => a as i64,
            (None, None) => -1,
        };
        if drain && timeout < 0 && !self.waits.has_poller_waiters() {
            let cause: String = format!("{:?} tasks wait for nothing that can happen", tasks);
            error!("turn(): {}", cause);
            return Err(Fail::new(libc::EDEADLK, &cause));
        }

        self.poll(timeout)?;
        self.waits.expire_polls(&mut self.ready);
        let now: u64 = self.clock.now_ms();
        self.waits.expire(self.poller.as_mut(), now, &mut self.ready);
        Ok(Turn::Continue)
    }

    fn poll(&mut self, timeout: i64) -> Result<(), Fail> {
        self.events.clear();
        match self.poller.wait(&mut self.events, self.capacity, timeout) {
            Ok(nevents) => {
                self.failures = 0;
                if nevents > 0 {
                    trace!("poll(): {:?} events", nevents);
                }
                for event in self.events.drain(..) {
                    self.waits.dispatch(event, &mut self.ready);
                }
                Ok(())
            },
            Err(e) => match self.policy {
                PollErrorPolicy::Retry if self.failures < self.retries => {
                    self.failures += 1;
                    warn!("poll(): wait failed, retrying ({:?}/{:?}): {:?}", self.failures, self.retries, e);
                    Ok(())
                },
                _ => {
                    error!("poll(): wait failed: {:?}", e);
                    Err(e)
                },
            },
        }
    }
}

impl RemoteHandle {
    /// Makes the scheduler's run loop return at its next iteration boundary, interrupting a blocked poller wait.
    pub fn stop(&self) -> Result<(), Fail> {
        self.stopped.store(true, Ordering::Release);
        self.waker.spak()
    }

    /// Interrupts a blocked poller wait without stopping.
    pub fn spak(&self) -> Result<(), Fail> {
        self.waker.spak()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
