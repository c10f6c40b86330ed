// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::corio::{
    Config,
    LoScheduler,
    Scheduler,
    SimClock,
    SimPoller,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Scheduler driven by a simulated poller and clock, with the handles a test needs to drive them.
#[allow(dead_code)]
pub fn sim_scheduler(config: &str) -> Result<(Scheduler, SimPoller, SimClock)> {
    ::corio::runtime::logging::initialize();
    let clock: SimClock = SimClock::default();
    let poller: SimPoller = SimPoller::new(clock.clone())?;
    let config: Config = config.parse()?;
    let scheduler: Scheduler = Scheduler::with_backend(&config, Box::new(poller.clone()), Box::new(clock.clone()))?;
    Ok((scheduler, poller, clock))
}

/// Stackless counterpart of [sim_scheduler].
#[allow(dead_code)]
pub fn sim_lo_scheduler(config: &str) -> Result<(LoScheduler, SimPoller, SimClock)> {
    ::corio::runtime::logging::initialize();
    let clock: SimClock = SimClock::default();
    let poller: SimPoller = SimPoller::new(clock.clone())?;
    let config: Config = config.parse()?;
    let scheduler: LoScheduler =
        LoScheduler::with_backend(&config, Box::new(poller.clone()), Box::new(clock.clone()))?;
    Ok((scheduler, poller, clock))
}

/// Configuration used by most tests.
#[allow(dead_code)]
pub const DEFAULT: &str = "{}";

/// Configuration that re-arms poller registrations after every event.
#[allow(dead_code)]
pub const ONESHOT: &str = "poller:\n  edge_triggered: false\n";
