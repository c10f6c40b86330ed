// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::corosensei::stack::DefaultStack;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Cache of released stacks of the default size.
pub(crate) struct StackPool {
    default_size: usize,
    capacity: usize,
    stacks: Vec<DefaultStack>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl StackPool {
    pub fn new(default_size: usize, capacity: usize) -> Self {
        Self {
            default_size,
            capacity,
            stacks: Vec::with_capacity(capacity),
        }
    }

    /// Returns a stack of at least `size` bytes, and the size it was asked for. Zero asks for the default size.
    pub fn take(&mut self, size: usize) -> Result<(DefaultStack, usize), Fail> {
        let size: usize = if size == 0 {
            self.default_size
        } else {
            size.max(limits::MIN_STACK_SIZE)
        };

        if size == self.default_size {
            if let Some(stack) = self.stacks.pop() {
                trace!("take(): reusing stack ({:?} cached)", self.stacks.len());
                return Ok((stack, size));
            }
        }
        match DefaultStack::new(size) {
            Ok(stack) => Ok((stack, size)),
            Err(e) => {
                let cause: String = format!("failed to allocate stack (size={:?})", size);
                error!("take(): {} ({:?})", cause, e);
                Err(Fail::new(e.raw_os_error().unwrap_or(libc::ENOMEM), &cause))
            },
        }
    }

    /// Keeps a released stack for reuse if it has the default size and the cache has room. Otherwise it is freed.
    pub fn give_back(&mut self, stack: DefaultStack, size: usize) {
        if size == self.default_size && self.stacks.len() < self.capacity {
            self.stacks.push(stack);
        }
    }

    /// Number of cached stacks.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
