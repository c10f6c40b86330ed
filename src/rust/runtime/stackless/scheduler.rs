// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

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
        TaskId,
        TaskState,
    },
    stackless::{
        context::{
            LoContext,
            Spawned,
            StepEffects,
        },
        LoRoutine,
        Step,
    },
    sync::WaitSignal,
    timer::TimerId,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Structures
//======================================================================================================================

struct LoTask {
    name: String,
    routine: Box<dyn LoRoutine<Output = ()>>,
    /// Outcome of the last wait.
    signal: WaitSignal<Resume>,
}

/// Cooperative scheduler for stackless tasks.
pub struct LoScheduler {
    engine: Engine,
    tasks: HashMap<TaskId, LoTask>,
    running: Option<TaskId>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LoScheduler {
    /// Creates a scheduler that polls with epoll and measures time with the monotonic clock.
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let poller: EpollPoller = EpollPoller::new(config.poller_capacity()?)?;
        Self::with_backend(config, Box::new(poller), Box::new(MonotonicClock::new()))
    }

    /// Creates a scheduler on top of the given poller and clock.
    pub fn with_backend(config: &Config, poller: Box<dyn Poller>, clock: Box<dyn ClockSource>) -> Result<Self, Fail> {
        Ok(Self {
            engine: Engine::new(config, poller, clock)?,
            tasks: HashMap::new(),
            running: None,
        })
    }

    /// Starts a task that steps `routine` until it is ready.
    pub fn start<R>(&mut self, name: &str, routine: R) -> Result<TaskId, Fail>
    where
        R: LoRoutine<Output = ()> + 'static,
    {
        let task: TaskId = self.engine.allocate_task();
        self.insert(Spawned {
            task,
            name: name.to_string(),
            routine: Box::new(routine),
        });
        Ok(task)
    }

    fn insert(&mut self, spawned: Spawned) {
        trace!("start(): name={:?} task_id={:?}", spawned.name, spawned.task);
        self.tasks.insert(
            spawned.task,
            LoTask {
                name: spawned.name,
                routine: spawned.routine,
                signal: WaitSignal::new(),
            },
        );
        self.engine.ready.push_back(ReadyEntry {
            task: spawned.task,
            resume: Resume::Start,
        });
    }

    /// Kills `task` without stepping it again. Fails with ESRCH if the task does not exist.
    pub fn kill(&mut self, task: TaskId) -> Result<(), Fail> {
        if !self.tasks.contains_key(&task) {
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
        let tasks: Vec<TaskId> = self.tasks.keys().copied().collect();
        trace!("kill_all(): {:?} tasks", tasks.len());
        for task in tasks {
            self.release(task);
        }
    }

    /// Steps tasks until every task is finished (`drain`) or until stopped.
    pub fn run(&mut self, drain: bool) -> Result<(), Fail> {
        self.run_until(drain, None)
    }

    /// Same as [LoScheduler::run], but also returns once the clock reaches `deadline`.
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

    pub fn stop(&self) {
        self.engine.stop();
    }

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

    pub fn post_timer<F: FnMut() + 'static>(&mut self, delay_ms: u64, periodic: bool, callback: F) -> TimerId {
        self.engine.post_timer(delay_ms, periodic, Box::new(callback))
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.engine.cancel_timer(id)
    }

    pub fn now_ms(&self) -> u64 {
        self.engine.now_ms()
    }

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
            Some(TaskState::Running)
        } else if !self.tasks.contains_key(&task) {
            self.engine.was_allocated(task).then_some(TaskState::Dead)
        } else if self.engine.waits.contains(task) {
            Some(TaskState::Suspended)
        } else {
            Some(TaskState::Ready)
        }
    }

    fn dispatch(&mut self, entry: ReadyEntry) {
        let ReadyEntry { task, resume } = entry;
        let LoTask { routine, signal, .. } = match self.tasks.get_mut(&task) {
            Some(lotask) => lotask,
            None => {
                trace!("dispatch(): task_id={:?} is gone", task);
                return;
            },
        };
        signal.take();
        signal.post(resume);

        self.running = Some(task);
        let mut cx: LoContext = LoContext::new(&mut self.engine, task, signal);
        let step: Step = routine.step(&mut cx);
        let effects: StepEffects = cx.finish();
        self.running = None;

        match step {
            Step::Ready(()) => {
                trace!("dispatch(): task_id={:?} finished", task);
                self.release(task);
            },
            // Nothing to wait for: same as a yield.
            Step::Pending if !effects.parked => self.engine.yield_now(task),
            Step::Pending => {},
        }
        for spawned in effects.spawned {
            self.insert(spawned);
        }
        for target in effects.kills {
            if let Err(e) = self.kill(target) {
                warn!("dispatch(): task_id={:?} could not kill task_id={:?}: {:?}", task, target, e);
            }
        }
    }

    /// Frees everything `task` holds. Runs exactly once per task.
    fn release(&mut self, task: TaskId) {
        if let Some(lotask) = self.tasks.remove(&task) {
            trace!("release(): name={:?} task_id={:?}", lotask.name, task);
            self.engine.forget(task);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
