// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod pal;
pub mod runtime;

pub use self::runtime::{
    clock::{
        ClockSource,
        MonotonicClock,
        SimClock,
    },
    config::{
        Config,
        PollErrorPolicy,
    },
    fail::Fail,
    poller::{
        EpollPoller,
        Poller,
        PollerEntry,
        PollerEvent,
        PollerObject,
        PollerWaker,
        SimPoller,
    },
    scheduler::{
        RemoteHandle,
        Scheduler,
        TaskId,
        TaskState,
        Yielder,
    },
    stackless::{
        LoContext,
        LoRoutine,
        LoScheduler,
        Step,
    },
    sync::Lock,
    timer::TimerId,
    worker::WorkerPool,
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, otherwise bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}

/// Ensures that two expressions differ, otherwise bails out of the enclosing function with an [anyhow::Error].
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}
