// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    engine::{
        Engine,
        Resume,
    },
    fail::Fail,
    poller::{
        PollerEvent,
        PollerObject,
    },
    scheduler::TaskId,
    stackless::LoRoutine,
    sync::{
        Lock,
        WaitSignal,
    },
};
use ::libc::pid_t;
use ::std::os::fd::AsRawFd;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A routine spawned from inside another one, inserted once the step is over.
pub(crate) struct Spawned {
    pub task: TaskId,
    pub name: String,
    pub routine: Box<dyn LoRoutine<Output = ()>>,
}

/// What a step left behind for its scheduler.
pub(crate) struct StepEffects {
    pub parked: bool,
    pub spawned: Vec<Spawned>,
    pub kills: Vec<TaskId>,
}

/// Access to the scheduler from inside [LoRoutine::step].
///
/// Wait calls return true when the task was parked, in which case the step must return [crate::Step::Pending] right
/// away. They return false when the outcome is already known; it is then available from [LoContext::io_result] or
/// [LoContext::proc_result] without suspending. The outcome of a wait that parked is available the same way in the
/// step that runs once the task is resumed.
pub struct LoContext<'a> {
    engine: &'a mut Engine,
    task: TaskId,
    signal: &'a mut WaitSignal<Resume>,
    parked: bool,
    spawned: Vec<Spawned>,
    kills: Vec<TaskId>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> LoContext<'a> {
    pub(crate) fn new(engine: &'a mut Engine, task: TaskId, signal: &'a mut WaitSignal<Resume>) -> Self {
        Self {
            engine,
            task,
            signal,
            parked: false,
            spawned: Vec::new(),
            kills: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> StepEffects {
        StepEffects {
            parked: self.parked,
            spawned: self.spawned,
            kills: self.kills,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    pub fn now_ms(&self) -> u64 {
        self.engine.now_ms()
    }

    fn already_parked(&mut self, resume: Resume) -> bool {
        if self.warn_parked() {
            self.signal.post(resume);
        }
        self.parked
    }

    fn warn_parked(&self) -> bool {
        if self.parked {
            warn!("task_id={:?} records a second wait in one step", self.task);
        }
        self.parked
    }

    /// Waits until socket `socket` is ready for `events`. See [crate::Yielder::wait_io] for timeouts and failures.
    pub fn wait_sock<S: AsRawFd>(&mut self, socket: &S, events: PollerEvent, timeout: i64) -> bool {
        self.wait_io(PollerObject::Socket(socket.as_raw_fd()), events, timeout)
    }

    /// Waits until pipe end `pipe` is ready for `events`.
    pub fn wait_pipe<P: AsRawFd>(&mut self, pipe: &P, events: PollerEvent, timeout: i64) -> bool {
        self.wait_io(PollerObject::Pipe(pipe.as_raw_fd()), events, timeout)
    }

    pub fn wait_io(&mut self, object: PollerObject, events: PollerEvent, timeout: i64) -> bool {
        self.signal.take();
        let busy: Resume = Resume::Io(Err(Fail::new(libc::EALREADY, "task already waits")));
        if self.already_parked(busy) {
            return false;
        }
        match self.engine.wait_io(self.task, object, events, timeout) {
            Ok(None) => {
                self.parked = true;
                true
            },
            Ok(Some(events)) => {
                self.signal.post(Resume::Io(Ok(events)));
                false
            },
            Err(e) => {
                self.signal.post(Resume::Io(Err(e)));
                false
            },
        }
    }

    /// Waits until process `pid` exits.
    pub fn wait_proc(&mut self, pid: pid_t, timeout: i64) -> bool {
        self.signal.take();
        let busy: Resume = Resume::Process(Err(Fail::new(libc::EALREADY, "task already waits")));
        if self.already_parked(busy) {
            return false;
        }
        match self.engine.wait_proc(self.task, pid, timeout) {
            Ok(None) => {
                self.parked = true;
                true
            },
            Ok(Some(status)) => {
                self.signal.post(Resume::Process(Ok(status)));
                false
            },
            Err(e) => {
                self.signal.post(Resume::Process(Err(e)));
                false
            },
        }
    }

    /// Outcome of the last socket or pipe wait, if one is available.
    pub fn io_result(&mut self) -> Option<Result<PollerEvent, Fail>> {
        match self.signal.take() {
            Some(Resume::Io(result)) => Some(result),
            Some(other) => {
                self.signal.post(other);
                None
            },
            None => None,
        }
    }

    /// Exit status of the last process wait, if one is available.
    pub fn proc_result(&mut self) -> Option<Result<i32, Fail>> {
        match self.signal.take() {
            Some(Resume::Process(result)) => Some(result),
            Some(other) => {
                self.signal.post(other);
                None
            },
            None => None,
        }
    }

    /// Sleeps for `timeout` milliseconds. Returns false for a zero timeout, which does not suspend, and when the step
    /// already recorded a wait, in which case nothing changes.
    pub fn sleep(&mut self, timeout: i64) -> bool {
        if self.warn_parked() || timeout == 0 {
            return false;
        }
        self.parked = self.engine.sleep(self.task, timeout);
        self.parked
    }

    /// Goes to the back of the ready queue once the step returns.
    pub fn yield_now(&mut self) {
        if !self.parked {
            self.engine.yield_now(self.task);
            self.parked = true;
        }
    }

    /// Enters `lock`. Returns false if the task was parked until ownership is handed over, which is when the next step
    /// runs.
    pub fn enter(&mut self, lock: &Lock) -> Result<bool, Fail> {
        if self.parked {
            return Err(Fail::new(libc::EALREADY, "task already waits"));
        }
        let entered: bool = self.engine.enter(self.task, lock)?;
        self.parked = !entered;
        Ok(entered)
    }

    pub fn leave(&mut self, lock: &Lock) -> Result<(), Fail> {
        self.engine.leave(self.task, lock)
    }

    /// Forgets everything known about `object`. Must be called before closing a descriptor that was waited on.
    pub fn cancel_io(&mut self, object: PollerObject) -> Result<(), Fail> {
        self.engine.cancel_io(object)
    }

    /// Starts a sibling task. It is inserted once the current step returns.
    pub fn start<R>(&mut self, name: &str, routine: R) -> TaskId
    where
        R: LoRoutine<Output = ()> + 'static,
    {
        let task: TaskId = self.engine.allocate_task();
        self.spawned.push(Spawned {
            task,
            name: name.to_string(),
            routine: Box::new(routine),
        });
        task
    }

    /// Kills `task` once the current step returns. A task may kill itself.
    pub fn kill(&mut self, task: TaskId) {
        self.kills.push(task);
    }

    /// Makes the scheduler's run loop return once this step is over.
    pub fn stop(&mut self) {
        self.engine.stop();
    }
}
