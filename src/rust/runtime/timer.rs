// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::scheduler::TaskId;
use ::core::cmp::Reverse;
use ::std::{
    collections::{
        BinaryHeap,
        HashMap,
    },
    fmt,
};

//==============================================================================
// Structures
//==============================================================================

/// Handle to a pending timer entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Who gets notified when a timer entry fires.
pub enum TimerOwner {
    /// A suspended task, handed back to the scheduler.
    Task(TaskId),
    /// A callback, run in place while the clock is advanced.
    Callback(Box<dyn FnMut()>),
}

struct TimerQueueEntry {
    expiry: u64,
    id: TimerId,
}

struct TimerTask {
    owner: TimerOwner,
    expiry: u64,
    period: Option<u64>,
}

/// Timer that holds one or more events for future wake up.
///
/// Entries live in a map and the heap only orders them, so cancelling is a map removal and heap entries whose id is
/// gone are skipped when they surface.
pub struct Timer {
    now: u64,
    next_id: u64,
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry>>,
    tasks: HashMap<TimerId, TimerTask>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Timer {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            next_id: 0,
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Schedules `task` to be handed back by [Timer::advance_clock] `delay_ms` from now.
    pub fn post_task(&mut self, task: TaskId, delay_ms: u64) -> TimerId {
        self.post(TimerOwner::Task(task), delay_ms, None)
    }

    /// Schedules `callback` to run `delay_ms` from now, and then every `delay_ms` if `periodic` is set.
    pub fn post_callback(&mut self, delay_ms: u64, periodic: bool, callback: Box<dyn FnMut()>) -> TimerId {
        // A zero period would fire forever within a single clock advance.
        let period: Option<u64> = if periodic { Some(delay_ms.max(1)) } else { None };
        self.post(TimerOwner::Callback(callback), delay_ms, period)
    }

    /// Removes a pending entry. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Milliseconds until the earliest pending entry expires, zero if one is overdue, or `None` if nothing is pending.
    pub fn delay(&mut self) -> Option<u64> {
        self.discard_cancelled();
        self.heap
            .peek()
            .map(|Reverse(entry)| entry.expiry.saturating_sub(self.now))
    }

    /// Moves the clock forward to `now`, running every expired callback and returning the tasks of every expired task
    /// entry, both in deadline order.
    pub fn advance_clock(&mut self, now: u64) -> Vec<TaskId> {
        if now > self.now {
            self.now = now;
        }

        let mut expired: Vec<TaskId> = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.now < entry.expiry {
                break;
            }
            let id: TimerId = entry.id;
            self.heap.pop();

            let rearm: Option<u64> = match self.tasks.get_mut(&id) {
                Some(timer) => {
                    if let TimerOwner::Callback(callback) = &mut timer.owner {
                        callback();
                    }
                    timer.period.map(|period| {
                        timer.expiry += period;
                        timer.expiry
                    })
                },
                // Cancelled.
                None => continue,
            };

            match rearm {
                Some(expiry) => self.heap.push(Reverse(TimerQueueEntry { expiry, id })),
                None => {
                    if let Some(TimerTask {
                        owner: TimerOwner::Task(task),
                        ..
                    }) = self.tasks.remove(&id)
                    {
                        expired.push(task);
                    }
                },
            }
        }
        expired
    }

    fn post(&mut self, owner: TimerOwner, delay_ms: u64, period: Option<u64>) -> TimerId {
        let id: TimerId = TimerId(self.next_id);
        self.next_id += 1;
        let expiry: u64 = self.now + delay_ms;
        self.tasks.insert(id, TimerTask { owner, expiry, period });
        self.heap.push(Reverse(TimerQueueEntry { expiry, id }));
        id
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.tasks.contains_key(&entry.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Debug for TimerOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerOwner::Task(task) => write!(f, "Task({:?})", task),
            TimerOwner::Callback(_) => write!(f, "Callback"),
        }
    }
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &TimerQueueEntry) -> bool {
        self.expiry == other.expiry && self.id == other.id
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &TimerQueueEntry) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    // Entries with the same expiry fire in the order they were posted.
    fn cmp(&self, other: &TimerQueueEntry) -> core::cmp::Ordering {
        self.expiry.cmp(&other.expiry).then(self.id.cmp(&other.id))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
