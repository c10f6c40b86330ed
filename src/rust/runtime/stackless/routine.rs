// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::stackless::context::LoContext;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Outcome of one step of a routine.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step<T = ()> {
    /// Not done. Either a wait was recorded through the context, or the routine yields.
    Pending,
    /// Done with a result.
    Ready(T),
}

/// Routine written as a closure over its own state.
pub struct FnRoutine<F>(F);

//======================================================================================================================
// Traits
//======================================================================================================================

/// Resumable state machine run by a [crate::LoScheduler].
///
/// Locals that must survive a suspension live in the implementing struct, next to a marker of where to resume. Each
/// call to [LoRoutine::step] picks up at that marker and runs until the routine waits or finishes. A routine that waits
/// from inside a nested routine must call the nested [LoRoutine::step] itself and return [Step::Pending] whenever the
/// nested one does; a plain function cannot suspend.
pub trait LoRoutine {
    type Output;

    fn step(&mut self, cx: &mut LoContext) -> Step<Self::Output>;
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Turns a closure into a routine. The closure is called once per step.
pub fn routine<T, F>(f: F) -> FnRoutine<F>
where
    F: FnMut(&mut LoContext) -> Step<T>,
{
    FnRoutine(f)
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> Step<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Step::Ready(_))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T, F> LoRoutine for FnRoutine<F>
where
    F: FnMut(&mut LoContext) -> Step<T>,
{
    type Output = T;

    fn step(&mut self, cx: &mut LoContext) -> Step<T> {
        (self.0)(cx)
    }
}

impl<R: LoRoutine + ?Sized> LoRoutine for Box<R> {
    type Output = R::Output;

    fn step(&mut self, cx: &mut LoContext) -> Step<R::Output> {
        (**self).step(cx)
    }
}
