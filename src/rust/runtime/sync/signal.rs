// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Structures
//==============================================================================

/// One-shot slot that carries the outcome of a wait to the code that resumes after it.
///
/// The waking side posts, the resumed side takes. Posting over a value nobody took keeps the newer one.
pub struct WaitSignal<T> {
    value: Option<T>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<T> WaitSignal<T> {
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Stores `value`, returning the one it replaced.
    pub fn post(&mut self, value: T) -> Option<T> {
        let old: Option<T> = self.value.replace(value);
        if old.is_some() {
            debug!("post(): overwriting a result that was never taken");
        }
        old
    }

    /// Takes the posted value, leaving the slot empty.
    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    pub fn peek(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_posted(&self) -> bool {
        self.value.is_some()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<T> Default for WaitSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
