// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::TaskId,
};
use ::std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct LockState {
    owner: Option<TaskId>,
    waiters: VecDeque<TaskId>,
}

/// Cooperative lock. A contested enter suspends the task instead of blocking the thread, and ownership passes to
/// waiters in the order they arrived.
///
/// Tasks go through [crate::Yielder::enter] and [crate::LoContext::enter]. The methods here only move ownership
/// around and never suspend.
#[derive(Clone)]
pub struct Lock {
    state: Rc<RefCell<LockState>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Lock {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(LockState {
                owner: None,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Makes `task` the owner if the lock is free. Fails with EDEADLK if `task` already owns it.
    pub fn try_enter(&self, task: TaskId) -> Result<bool, Fail> {
        let mut state = self.state.borrow_mut();
        match state.owner {
            None => {
                state.owner = Some(task);
                Ok(true)
            },
            Some(owner) if owner == task => {
                let cause: String = format!("task already owns the lock (task_id={:?})", task);
                error!("try_enter(): {}", cause);
                Err(Fail::new(libc::EDEADLK, &cause))
            },
            Some(_) => Ok(false),
        }
    }

    /// Appends `task` to the wait queue.
    pub(crate) fn enqueue(&self, task: TaskId) {
        self.state.borrow_mut().waiters.push_back(task);
    }

    /// Gives the lock up. Returns the waiter that now owns it, if any. Fails with EPERM if `task` is not the owner.
    pub fn leave(&self, task: TaskId) -> Result<Option<TaskId>, Fail> {
        let mut state = self.state.borrow_mut();
        if state.owner != Some(task) {
            let cause: String = format!("lock is not owned by task (task_id={:?})", task);
            error!("leave(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        let next: Option<TaskId> = state.waiters.pop_front();
        state.owner = next;
        Ok(next)
    }

    /// Drops `task` from the wait queue. Returns false if it was not waiting.
    pub(crate) fn remove_waiter(&self, task: TaskId) -> bool {
        let mut state = self.state.borrow_mut();
        let before: usize = state.waiters.len();
        state.waiters.retain(|waiter| *waiter != task);
        before != state.waiters.len()
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.state.borrow().owner
    }

    /// Number of tasks waiting to enter.
    pub fn waiting(&self) -> usize {
        self.state.borrow().waiters.len()
    }

    /// Destroys the lock. Fails with EBUSY while it is owned or waited on.
    pub fn exit(self) -> Result<(), Fail> {
        let state = self.state.borrow();
        if state.owner.is_some() || !state.waiters.is_empty() {
            let cause: &str = "lock is in use";
            error!("exit(): {}", cause);
            return Err(Fail::new(libc::EBUSY, cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Tests
//======================================================================================================================
