// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Stackful scheduler.
//!
//! Every task runs on its own stack. A task hands control back to the scheduler by suspending with a [Request], and
//! the scheduler either answers at once and resumes it again, or parks it in the ready queue or the wait table. The
//! scheduler itself runs on the stack of the thread that calls [Scheduler::run].

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    clock::{
        ClockSource,
        MonotonicClock,
    },
    config::Config,
    engine::{
        Engine,
        ReadyEntry,
        RemoteHandle,
        Resume,
        Turn,
    },
    fail::Fail,
    poller::{
        EpollPoller,
        Poller,
    },
    scheduler::{
        stack::StackPool,
        task::{
            Task,
            TaskCoroutine,
            TaskId,
            TaskState,
        },
        yielder::{
            Request,
            TaskBody,
            Yielder,
        },
    },
    timer::TimerId,
};
use ::corosensei::{
    stack::DefaultStack,
    Coroutine,
    CoroutineResult,
};
use ::slab::Slab;
use ::std::collections::HashMap;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What happens to the running task after its scheduler handled a request.
enum Reply {
    /// Resume it at once with this.
    Resume(Resume),
    /// It is parked, run something else.
    Park,
    /// It is finished.
    Exit,
}

/// Cooperative scheduler for stackful tasks.
pub struct Scheduler {
    engine: Engine,
    tasks: Slab<Task>,
    ids: HashMap<TaskId, usize>,
    running: Option<TaskId>,
    stacks: StackPool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    /// Creates a scheduler that polls with epoll and measures time with the monotonic clock.
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let poller: EpollPoller = EpollPoller::new(config.poller_capacity()?)?;
        Self::with_backend(config, Box::new(poller), Box::new(MonotonicClock::new()))
    }

    /// Creates a scheduler on top of the given poller and clock.
    pub fn with_backend(config: &Config, poller: Box<dyn Poller>, clock: Box<dyn ClockSource>) -> Result<Self, Fail> {
        Ok(Self {
            engine: Engine::new(config, poller, clock)?,
            tasks: Slab::new(),
            ids: HashMap::new(),
            running: None,
            stacks: StackPool::new(config.stack_size()?, config.stack_cache()?),
        })
    }

    /// Starts a task that runs `body` on a stack of `stack_size` bytes (zero for the configured default). The task
    /// runs once the scheduler loop reaches it.
    pub fn start<F>(&mut self, name: &str, body: F, stack_size: usize) -> Result<TaskId, Fail>
    where
        F: FnOnce(&Yielder) + 'static,
    {
        self.spawn(name.to_string(), Box::new(body), stack_size)
    }

    fn spawn(&mut self, name: String, body: TaskBody, stack_size: usize) -> Result<TaskId, Fail> {
        let (stack, stack_size): (DefaultStack, usize) = self.stacks.take(stack_size)?;
        let id: TaskId = self.engine.allocate_task();
        let coroutine: TaskCoroutine =
            Coroutine::with_stack(stack, move |inner: &::corosensei::Yielder<Resume, Request>, _: Resume| {
                let yielder: Yielder = Yielder::new(inner, id);
                body(&yielder);
            });

        trace!("start(): name={:?} task_id={:?} stack_size={:?}", name, id, stack_size);
        let index: usize = self.tasks.insert(Task::new(id, name, coroutine, stack_size));
        self.ids.insert(id, index);
        self.engine.ready.push_back(ReadyEntry {
            task: id,
            resume: Resume::Start,
        });
        Ok(id)
    }

    /// Kills `task` without resuming it. Its wait, timer and poller registration are dropped and its stack is
    /// released. Fails with ESRCH if the task does not exist.
    pub fn kill(&mut self, task: TaskId) -> Result<(), Fail> {
        if self.running == Some(task) {
            let cause: String = format!("cannot kill the running task from outside (task_id={:?})", task);
            error!("kill(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if !self.ids.contains_key(&task) {
            let cause: String = format!("invalid task (task_id={:?})", task);
            error!("kill(): {}", cause);
            return Err(Fail::new(libc::ESRCH, &cause));
        }
        trace!("kill(): task_id={:?}", task);
        self.release(task);
        Ok(())
    }

    /// Kills every task.
    pub fn kill_all(&mut self) {
        let tasks: Vec<TaskId> = self.ids.keys().copied().filter(|id| Some(*id) != self.running).collect();
        trace!("kill_all(): {:?} tasks", tasks.len());
        for task in tasks {
            self.release(task);
        }
    }

    /// Runs tasks until every task is finished (`drain`) or until stopped.
    pub fn run(&mut self, drain: bool) -> Result<(), Fail> {
        self.run_until(drain, None)
    }

    /// Same as [Scheduler::run], but also returns once the clock reaches `deadline`.
    pub fn run_until(&mut self, drain: bool, deadline: Option<u64>) -> Result<(), Fail> {
        trace!("run(): drain={:?} deadline={:?}", drain, deadline);
        let result: Result<(), Fail> = self.run_loop(drain, deadline);
        self.engine.finish();
        result
    }

    fn run_loop(&mut self, drain: bool, deadline: Option<u64>) -> Result<(), Fail> {
        loop {
            // Tasks readied during this pass run in the next one.
            for _ in 0..self.engine.ready.len() {
                if let Some(entry) = self.engine.ready.pop_front() {
                    self.dispatch(entry);
                }
                if self.engine.is_stopped() {
                    return Ok(());
                }
            }
            if self.engine.turn(drain, deadline, self.tasks.len())? == Turn::Done {
                return Ok(());
            }
        }
    }

    /// Makes [Scheduler::run] return at its next iteration boundary.
    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Handle that stops this scheduler from another thread.
    pub fn remote(&self) -> RemoteHandle {
        self.engine.remote()
    }

    /// Destroys the scheduler. Fails with EBUSY while tasks are left.
    pub fn exit(self) -> Result<(), Fail> {
        if !self.tasks.is_empty() {
            let cause: String = format!("{:?} tasks are still alive", self.tasks.len());
            error!("exit(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        Ok(())
    }

    /// Runs `callback` after `delay_ms`, and then every `delay_ms` if `periodic` is set.
    pub fn post_timer<F: FnMut() + 'static>(&mut self, delay_ms: u64, periodic: bool, callback: F) -> TimerId {
        self.engine.post_timer(delay_ms, periodic, Box::new(callback))
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.engine.cancel_timer(id)
    }

    pub fn now_ms(&self) -> u64 {
        self.engine.now_ms()
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn ready_count(&self) -> usize {
        self.engine.ready.len()
    }

    pub fn suspended_count(&self) -> usize {
        self.engine.waits.len()
    }

    /// State of `task`, `None` if this scheduler never started it.
    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        if self.running == Some(task) {
            return Some(TaskState::Running);
        }
        if !self.ids.contains_key(&task) {
            return self.engine.was_allocated(task).then_some(TaskState::Dead);
        }
        if self.engine.waits.contains(task) {
            Some(TaskState::Suspended)
        } else {
            Some(TaskState::Ready)
        }
    }

    /// Runs a ready task until it parks itself or finishes.
    fn dispatch(&mut self, entry: ReadyEntry) {
        let ReadyEntry { task, mut resume } = entry;
        let index: usize = match self.ids.get(&task) {
            Some(index) => *index,
            None => {
                trace!("dispatch(): task_id={:?} is gone", task);
                return;
            },
        };
        let mut coroutine: TaskCoroutine = match self.tasks[index].take_coroutine() {
            Some(coroutine) => coroutine,
            None => return,
        };

        self.running = Some(task);
        let finished: bool = loop {
            match coroutine.resume(resume) {
                CoroutineResult::Return(()) => break true,
                CoroutineResult::Yield(request) => match self.handle(task, request) {
                    Reply::Resume(next) => resume = next,
                    Reply::Park => break false,
                    Reply::Exit => break true,
                },
            }
        };
        self.running = None;

        self.tasks[index].put_coroutine(coroutine);
        if finished {
            trace!("dispatch(): task_id={:?} finished", task);
            self.release(task);
        }
    }

    fn handle(&mut self, task: TaskId, request: Request) -> Reply {
        match request {
            Request::WaitIo {
                object,
                events,
                timeout,
            } => match self.engine.wait_io(task, object, events, timeout) {
                Ok(Some(events)) => Reply::Resume(Resume::Io(Ok(events))),
                Ok(None) => Reply::Park,
                Err(e) => Reply::Resume(Resume::Io(Err(e))),
            },
            Request::WaitProc { pid, timeout } => match self.engine.wait_proc(task, pid, timeout) {
                Ok(Some(status)) => Reply::Resume(Resume::Process(Ok(status))),
                Ok(None) => Reply::Park,
                Err(e) => Reply::Resume(Resume::Process(Err(e))),
            },
            Request::Sleep(timeout) => {
                if self.engine.sleep(task, timeout) {
                    Reply::Park
                } else {
                    Reply::Resume(Resume::Timer)
                }
            },
            Request::Yield => {
                self.engine.yield_now(task);
                Reply::Park
            },
            Request::Enter(lock) => match self.engine.enter(task, &lock) {
                Ok(true) => Reply::Resume(Resume::Done(Ok(()))),
                Ok(false) => Reply::Park,
                Err(e) => Reply::Resume(Resume::Done(Err(e))),
            },
            Request::Leave(lock) => Reply::Resume(Resume::Done(self.engine.leave(task, &lock))),
            Request::CancelIo(object) => Reply::Resume(Resume::Done(self.engine.cancel_io(object))),
            Request::Start {
                name,
                body,
                stack_size,
            } => Reply::Resume(Resume::Started(self.spawn(name, body, stack_size))),
            Request::Kill(target) if target == task => Reply::Exit,
            Request::Kill(target) => Reply::Resume(Resume::Done(self.kill(target))),
            Request::Exit => Reply::Exit,
            Request::Stop => {
                self.engine.stop();
                Reply::Resume(Resume::Done(Ok(())))
            },
            Request::Now => Reply::Resume(Resume::Clock(self.engine.now_ms())),
        }
    }

    /// Frees everything `task` holds. Runs exactly once per task.
    fn release(&mut self, task: TaskId) {
        let index: usize = match self.ids.remove(&task) {
            Some(index) => index,
            None => return,
        };
        self.engine.forget(task);
        let task: Task = self.tasks.remove(index);
        trace!("release(): name={:?} task_id={:?}", task.name(), task.id());
        let stack_size: usize = task.stack_size();
        if let Some(stack) = task.into_stack() {
            self.stacks.give_back(stack, stack_size);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
