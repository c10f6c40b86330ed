// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    engine::Resume,
    scheduler::yielder::Request,
};
use ::corosensei::{
    stack::DefaultStack,
    Coroutine,
};
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier. Identifiers are never reused by a scheduler.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Where a task is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// In the ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting for I/O, a process, a timer or a lock.
    Suspended,
    /// Finished or killed.
    Dead,
}

pub(crate) type TaskCoroutine = Coroutine<Resume, Request, (), DefaultStack>;

/// A stackful task: a coroutine running on its own stack.
pub(crate) struct Task {
    id: TaskId,
    /// Task name, for debugging.
    name: String,
    /// Taken out while the task runs.
    coroutine: Option<TaskCoroutine>,
    stack_size: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Task {
    pub fn new(id: TaskId, name: String, coroutine: TaskCoroutine, stack_size: usize) -> Self {
        Self {
            id,
            name,
            coroutine: Some(coroutine),
            stack_size,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn take_coroutine(&mut self) -> Option<TaskCoroutine> {
        self.coroutine.take()
    }

    pub fn put_coroutine(&mut self, coroutine: TaskCoroutine) {
        self.coroutine = Some(coroutine);
    }

    /// Tears the task down and returns its stack. A suspended coroutine is abandoned where it stands: none of its
    /// code runs again and its live locals are leaked.
    pub fn into_stack(mut self) -> Option<DefaultStack> {
        let mut coroutine: TaskCoroutine = self.coroutine.take()?;
        Self::abandon(&mut coroutine);
        if coroutine.done() {
            Some(coroutine.into_stack())
        } else {
            // Never started.
            None
        }
    }

    fn abandon(coroutine: &mut TaskCoroutine) {
        if coroutine.started() && !coroutine.done() {
            // Safety: the coroutine is suspended and is never resumed again. Skipping the unwind leaks whatever the
            // task body holds on its stack, which is the contract of kill.
            unsafe { coroutine.force_reset() };
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(coroutine) = self.coroutine.as_mut() {
            Self::abandon(coroutine);
        }
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
