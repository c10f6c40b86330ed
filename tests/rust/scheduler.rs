// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::corio::{
    ClockSource,
    Config,
    Lock,
    PollerEvent,
    PollerObject,
    RemoteHandle,
    Scheduler,
    TaskId,
    TaskState,
    TimerId,
    Yielder,
};
use ::rand::{
    rngs::SmallRng,
    seq::SliceRandom,
    SeedableRng,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    rc::Rc,
    thread,
    time::Duration,
};
use common::{
    sim_scheduler,
    DEFAULT,
    ONESHOT,
};

//==============================================================================
// Ordering
//==============================================================================

/// Tests if sleeping tasks resume in deadline order, whatever order they were started in.
#[test]
fn sleepers_resume_in_deadline_order() -> Result<()> {
    let (mut scheduler, _, clock) = sim_scheduler(DEFAULT)?;
    let mut delays: Vec<i64> = (1..=64).map(|i| i * 7).collect();
    delays.shuffle(&mut SmallRng::seed_from_u64(42));

    let woken: Rc<RefCell<Vec<(i64, u64)>>> = Rc::new(RefCell::new(Vec::new()));
    for delay in delays.iter().copied() {
        let woken = woken.clone();
        scheduler.start(
            "sleeper",
            move |y: &Yielder| {
                y.sleep(delay);
                woken.borrow_mut().push((delay, y.now_ms()));
            },
            0,
        )?;
    }
    scheduler.run(true)?;

    let woken = woken.borrow();
    corio::ensure_eq!(woken.len(), delays.len());
    for pair in woken.windows(2) {
        corio::ensure_eq!(pair[0].0 < pair[1].0, true);
    }
    for (delay, at) in woken.iter() {
        corio::ensure_eq!(*at, *delay as u64);
    }
    corio::ensure_eq!(clock.now_ms(), 64 * 7);
    Ok(())
}

/// Tests if every started task runs exactly once.
#[test]
fn every_task_runs_exactly_once() -> Result<()> {
    const NTASKS: usize = 1000;
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let counter: Rc<Cell<usize>> = Rc::new(Cell::new(0));
    for _ in 0..NTASKS {
        let counter = counter.clone();
        scheduler.start("incr", move |_: &Yielder| counter.set(counter.get() + 1), 0)?;
    }
    corio::ensure_eq!(scheduler.task_count(), NTASKS);
    scheduler.run(true)?;
    corio::ensure_eq!(counter.get(), NTASKS);
    corio::ensure_eq!(scheduler.task_count(), 0);
    scheduler.exit()?;
    Ok(())
}

/// Tests if a zero sleep neither suspends nor yields.
#[test]
fn zero_sleep_does_not_yield() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let trace: Rc<RefCell<String>> = Rc::new(RefCell::new(String::new()));

    let a = trace.clone();
    scheduler.start(
        "a",
        move |y: &Yielder| {
            a.borrow_mut().push('a');
            y.sleep(0);
            a.borrow_mut().push('a');
        },
        0,
    )?;
    let b = trace.clone();
    scheduler.start("b", move |_: &Yielder| b.borrow_mut().push('b'), 0)?;
    scheduler.run(true)?;
    corio::ensure_eq!(trace.borrow().as_str(), "aab");
    Ok(())
}

//==============================================================================
// Locks
//==============================================================================

/// Tests if a lock never lets two tasks in at once.
#[test]
fn lock_is_mutually_exclusive() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let lock: Lock = Lock::new();
    let inside: Rc<Cell<u32>> = Rc::new(Cell::new(0));
    let violations: Rc<Cell<u32>> = Rc::new(Cell::new(0));

    for _ in 0..8 {
        let lock = lock.clone();
        let inside = inside.clone();
        let violations = violations.clone();
        scheduler.start(
            "contender",
            move |y: &Yielder| {
                for round in 0..20 {
                    if y.enter(&lock).is_err() {
                        return;
                    }
                    inside.set(inside.get() + 1);
                    if inside.get() > 1 {
                        violations.set(violations.get() + 1);
                    }
                    if round % 2 == 0 {
                        y.yield_now();
                    } else {
                        y.sleep(3);
                    }
                    inside.set(inside.get() - 1);
                    if y.leave(&lock).is_err() {
                        return;
                    }
                }
            },
            0,
        )?;
    }
    scheduler.run(true)?;
    corio::ensure_eq!(violations.get(), 0);
    corio::ensure_eq!(lock.owner(), None);
    lock.exit()?;
    Ok(())
}

/// Five tasks each take the lock ten times and hold it for a second: the run is fully serialized and the lock goes
/// around in arrival order.
#[test]
fn lock_serializes_sleepers_in_fifo_order() -> Result<()> {
    const NTASKS: usize = 5;
    const NROUNDS: usize = 10;
    let (mut scheduler, _, clock) = sim_scheduler(DEFAULT)?;
    let lock: Lock = Lock::new();
    let order: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    for index in 0..NTASKS {
        let lock = lock.clone();
        let order = order.clone();
        scheduler.start(
            "worker",
            move |y: &Yielder| {
                for _ in 0..NROUNDS {
                    if y.enter(&lock).is_err() {
                        return;
                    }
                    order.borrow_mut().push(index);
                    y.sleep(1000);
                    if y.leave(&lock).is_err() {
                        return;
                    }
                }
            },
            0,
        )?;
    }
    scheduler.run(true)?;

    let expected: Vec<usize> = (0..NTASKS * NROUNDS).map(|i| i % NTASKS).collect();
    corio::ensure_eq!(*order.borrow(), expected);
    corio::ensure_eq!(clock.now_ms() >= (NTASKS * NROUNDS * 1000) as u64, true);
    Ok(())
}

/// Tests that killing the owner of a lock leaves the lock owned.
#[test]
fn killed_owner_keeps_lock() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let lock: Lock = Lock::new();

    let owned = lock.clone();
    let owner: TaskId = scheduler.start(
        "owner",
        move |y: &Yielder| {
            if y.enter(&owned).is_ok() {
                y.sleep(-1);
            }
        },
        0,
    )?;
    let queued = lock.clone();
    let waiter: TaskId = scheduler.start(
        "waiter",
        move |y: &Yielder| {
            let _ = y.enter(&queued);
        },
        0,
    )?;
    scheduler.run_until(true, Some(10))?;
    corio::ensure_eq!(lock.waiting(), 1);

    scheduler.kill(owner)?;
    corio::ensure_eq!(lock.owner(), Some(owner));
    scheduler.kill(waiter)?;
    corio::ensure_eq!(lock.waiting(), 0);
    corio::ensure_eq!(lock.exit().is_err(), true);
    Ok(())
}

/// Tests if a lock handed to a task that is killed before it runs goes on to the next waiter.
#[test]
fn lock_handed_to_killed_task_moves_on() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let lock: Lock = Lock::new();
    let victim: Rc<Cell<Option<TaskId>>> = Rc::new(Cell::new(None));
    let entered: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let owned = lock.clone();
    let target = victim.clone();
    scheduler.start(
        "owner",
        move |y: &Yielder| {
            if y.enter(&owned).is_err() {
                return;
            }
            y.sleep(10);
            // The first waiter now owns the lock but has not run yet.
            let _ = y.leave(&owned);
            if let Some(task) = target.get() {
                let _ = y.kill(task);
            }
        },
        0,
    )?;
    for name in ["first", "second"] {
        let queued = lock.clone();
        let log = entered.clone();
        let task: TaskId = scheduler.start(
            name,
            move |y: &Yielder| {
                if y.enter(&queued).is_ok() {
                    log.borrow_mut().push(name);
                    let _ = y.leave(&queued);
                }
            },
            0,
        )?;
        if victim.get().is_none() {
            victim.set(Some(task));
        }
    }
    scheduler.run(true)?;

    corio::ensure_eq!(*entered.borrow(), vec!["second"]);
    corio::ensure_eq!(lock.owner(), None);
    corio::ensure_eq!(lock.waiting(), 0);
    lock.exit()?;
    scheduler.exit()?;
    Ok(())
}

//==============================================================================
// Cancellation
//==============================================================================

/// Tests if kill_all ends every task, and no killed task runs another statement.
#[test]
fn kill_all_freezes_every_task() -> Result<()> {
    const NTASKS: usize = 16;
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let steps: Vec<Rc<Cell<u64>>> = (0..NTASKS).map(|_| Rc::new(Cell::new(0))).collect();

    for (index, counter) in steps.iter().enumerate() {
        let counter = counter.clone();
        scheduler.start(
            "looper",
            move |y: &Yielder| loop {
                counter.set(counter.get() + 1);
                match index % 3 {
                    0 => y.sleep(5 + index as i64),
                    1 => {
                        y.yield_now();
                        y.sleep(3);
                    },
                    _ => {
                        let _ = y.wait_io(PollerObject::Socket(100 + index as i32), PollerEvent::RECV, 50);
                    },
                }
            },
            0,
        )?;
    }
    scheduler.run_until(true, Some(40))?;
    let frozen: Vec<u64> = steps.iter().map(|counter| counter.get()).collect();

    scheduler.kill_all();
    corio::ensure_eq!(scheduler.task_count(), 0);
    corio::ensure_eq!(scheduler.ready_count(), 0);
    corio::ensure_eq!(scheduler.suspended_count(), 0);
    scheduler.run(true)?;

    let after: Vec<u64> = steps.iter().map(|counter| counter.get()).collect();
    corio::ensure_eq!(after, frozen);
    scheduler.exit()?;
    Ok(())
}

/// Tests if killing a task that waits on an object drops the poller registration.
#[test]
fn kill_drops_registration() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(7);
    let task: TaskId = scheduler.start(
        "reader",
        move |y: &Yielder| {
            let _ = y.wait_io(object, PollerEvent::RECV, -1);
        },
        0,
    )?;
    scheduler.run_until(true, Some(1))?;
    corio::ensure_eq!(poller.is_registered(object), true);
    corio::ensure_eq!(scheduler.state(task), Some(TaskState::Suspended));

    scheduler.kill(task)?;
    corio::ensure_eq!(poller.is_registered(object), false);
    corio::ensure_eq!(scheduler.state(task), Some(TaskState::Dead));
    Ok(())
}

/// Tests if a task can kill a sibling and start new ones.
#[test]
fn tasks_start_and_kill_siblings() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let parent_log = log.clone();
    scheduler.start(
        "parent",
        move |y: &Yielder| {
            let child_log = parent_log.clone();
            let child: TaskId = match y.start(
                "child",
                move |y: &Yielder| {
                    child_log.borrow_mut().push("child");
                    y.sleep(-1);
                    child_log.borrow_mut().push("unreachable");
                },
                0,
            ) {
                Ok(child) => child,
                Err(_) => return,
            };
            parent_log.borrow_mut().push("parent");
            y.yield_now();
            if y.kill(child).is_ok() {
                parent_log.borrow_mut().push("killed");
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(*log.borrow(), vec!["parent", "child", "killed"]);
    Ok(())
}

/// Tests if a task waiting forever with nothing that could wake it is reported instead of hanging.
#[test]
fn drain_reports_deadlock() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    scheduler.start("forever", |y: &Yielder| y.sleep(-1), 0)?;
    let result = scheduler.run(true);
    corio::ensure_eq!(result.map_err(|e| e.errno), Err(libc::EDEADLK));
    scheduler.kill_all();
    scheduler.exit()?;
    Ok(())
}

//==============================================================================
// I/O waits
//==============================================================================

/// Tests if a task is resumed exactly once per readiness event.
#[test]
fn one_resumption_per_event() -> Result<()> {
    const NEVENTS: u64 = 10_000;
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(12);

    let injected: Rc<Cell<u64>> = Rc::new(Cell::new(0));
    let injector = poller.clone();
    let count = injected.clone();
    let timer: TimerId = scheduler.post_timer(1, true, move || {
        injector.inject(object, PollerEvent::RECV);
        count.set(count.get() + 1);
    });

    let resumed: Rc<Cell<u64>> = Rc::new(Cell::new(0));
    let counter = resumed.clone();
    scheduler.start(
        "reader",
        move |y: &Yielder| {
            for _ in 0..NEVENTS {
                match y.wait_io(object, PollerEvent::RECV, -1) {
                    Ok(events) if events.contains(PollerEvent::RECV) => counter.set(counter.get() + 1),
                    _ => return,
                }
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(scheduler.cancel_timer(timer), true);

    corio::ensure_eq!(resumed.get(), NEVENTS);
    corio::ensure_eq!(injected.get(), NEVENTS);
    corio::ensure_eq!(poller.pending(), 0);
    Ok(())
}

/// Same as [one_resumption_per_event] with registrations re-armed after every event.
#[test]
fn oneshot_mode_rearms_every_wait() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(ONESHOT)?;
    let object: PollerObject = PollerObject::Pipe(5);
    let injector = poller.clone();
    scheduler.post_timer(2, true, move || injector.inject(object, PollerEvent::SEND));

    let resumed: Rc<Cell<u32>> = Rc::new(Cell::new(0));
    let counter = resumed.clone();
    scheduler.start(
        "writer",
        move |y: &Yielder| {
            for _ in 0..100 {
                if y.wait_io(object, PollerEvent::SEND, -1).is_err() {
                    return;
                }
                counter.set(counter.get() + 1);
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(resumed.get(), 100);
    Ok(())
}

/// Tests wait timeouts, including the zero timeout that only polls.
#[test]
fn wait_io_times_out() -> Result<()> {
    let (mut scheduler, _, clock) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(3);
    let results: Rc<RefCell<Vec<(i32, u64)>>> = Rc::new(RefCell::new(Vec::new()));

    let out = results.clone();
    scheduler.start(
        "impatient",
        move |y: &Yielder| {
            for timeout in [0, 100] {
                if let Err(e) = y.wait_io(object, PollerEvent::RECV, timeout) {
                    out.borrow_mut().push((e.errno, y.now_ms()));
                }
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(*results.borrow(), vec![(libc::ETIMEDOUT, 0), (libc::ETIMEDOUT, 100)]);
    corio::ensure_eq!(clock.now_ms(), 100);
    Ok(())
}

/// Tests if readiness that nobody waited for is handed to the next wait without suspending.
#[test]
fn cached_readiness_is_returned_at_once() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(21);
    let injector = poller.clone();
    scheduler.post_timer(15, false, move || injector.inject(object, PollerEvent::RECV | PollerEvent::SEND));

    let seen: Rc<RefCell<Vec<(char, Result<PollerEvent, i32>)>>> = Rc::new(RefCell::new(Vec::new()));
    let out = seen.clone();
    scheduler.start(
        "reader",
        move |y: &Yielder| {
            let first = y.wait_io(object, PollerEvent::RECV, 10).map_err(|e| e.errno);
            out.borrow_mut().push(('r', first));
            // RECV becomes ready while nobody waits for it.
            y.sleep(10);
            let second = y.wait_io(object, PollerEvent::RECV, 0).map_err(|e| e.errno);
            out.borrow_mut().push(('r', second));
        },
        0,
    )?;
    let out = seen.clone();
    scheduler.start(
        "writer",
        move |y: &Yielder| {
            let events = y.wait_io(object, PollerEvent::SEND, -1).map_err(|e| e.errno);
            out.borrow_mut().push(('w', events));
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(
        *seen.borrow(),
        vec![
            ('r', Err(libc::ETIMEDOUT)),
            ('w', Ok(PollerEvent::SEND)),
            ('r', Ok(PollerEvent::RECV)),
        ]
    );
    Ok(())
}

/// Tests if a second task waiting for the same direction of an object is turned away.
#[test]
fn second_waiter_is_busy() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(30);
    let errno: Rc<Cell<i32>> = Rc::new(Cell::new(0));

    scheduler.start(
        "first",
        move |y: &Yielder| {
            let _ = y.wait_io(object, PollerEvent::RECV, 10);
        },
        0,
    )?;
    let out = errno.clone();
    scheduler.start(
        "second",
        move |y: &Yielder| {
            if let Err(e) = y.wait_io(object, PollerEvent::RECV, 10) {
                out.set(e.errno);
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(errno.get(), libc::EBUSY);
    Ok(())
}

/// Tests if cancelling an object wakes its waiter with ECANCELED and drops the registration.
#[test]
fn cancel_io_wakes_waiter() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(40);
    let errno: Rc<Cell<i32>> = Rc::new(Cell::new(0));

    let out = errno.clone();
    scheduler.start(
        "waiter",
        move |y: &Yielder| {
            if let Err(e) = y.wait_io(object, PollerEvent::RECV, -1) {
                out.set(e.errno);
            }
        },
        0,
    )?;
    scheduler.start(
        "closer",
        move |y: &Yielder| {
            let _ = y.cancel_io(object);
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(errno.get(), libc::ECANCELED);
    corio::ensure_eq!(poller.is_registered(object), false);
    Ok(())
}

/// Tests if a hang-up wakes the reader and keeps waking later waits.
#[test]
fn eof_wakes_every_later_wait() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let object: PollerObject = PollerObject::Socket(50);
    let injector = poller.clone();
    scheduler.post_timer(5, false, move || injector.inject(object, PollerEvent::EOF));

    let woken: Rc<Cell<u32>> = Rc::new(Cell::new(0));
    let counter = woken.clone();
    scheduler.start(
        "reader",
        move |y: &Yielder| {
            for _ in 0..3 {
                match y.wait_io(object, PollerEvent::RECV, -1) {
                    Ok(events) if events.contains(PollerEvent::RECV) => counter.set(counter.get() + 1),
                    _ => return,
                }
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(woken.get(), 3);
    Ok(())
}

//==============================================================================
// Processes
//==============================================================================

/// Tests process waits: exit after the wait started, exit before it started, and timeout.
#[test]
fn wait_proc_reports_status() -> Result<()> {
    let (mut scheduler, poller, _) = sim_scheduler(DEFAULT)?;
    let injector = poller.clone();
    scheduler.post_timer(20, false, move || injector.exit_process(1001, 7));
    poller.exit_process(1002, 3);

    let results: Rc<RefCell<Vec<Result<i32, i32>>>> = Rc::new(RefCell::new(Vec::new()));
    let out = results.clone();
    scheduler.start(
        "parent",
        move |y: &Yielder| {
            for (pid, timeout) in [(1001, -1), (1002, 0), (1003, 30)] {
                out.borrow_mut().push(y.wait_proc(pid, timeout).map_err(|e| e.errno));
            }
        },
        0,
    )?;
    scheduler.run(true)?;
    corio::ensure_eq!(*results.borrow(), vec![Ok(7), Ok(3), Err(libc::ETIMEDOUT)]);
    corio::ensure_eq!(poller.registrations(), 0);
    Ok(())
}

//==============================================================================
// Timers and stop
//==============================================================================

/// Tests periodic callbacks and their cancellation.
#[test]
fn periodic_timer_fires_until_cancelled() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    let fired: Rc<Cell<u32>> = Rc::new(Cell::new(0));
    let counter = fired.clone();
    let timer: TimerId = scheduler.post_timer(10, true, move || counter.set(counter.get() + 1));

    scheduler.run_until(false, Some(55))?;
    corio::ensure_eq!(fired.get(), 5);
    corio::ensure_eq!(scheduler.cancel_timer(timer), true);
    corio::ensure_eq!(scheduler.cancel_timer(timer), false);
    scheduler.run_until(false, Some(100))?;
    corio::ensure_eq!(fired.get(), 5);
    Ok(())
}

/// Tests if a scheduler blocked in its poller can be stopped from another thread.
#[test]
fn remote_stop_interrupts_blocked_run() -> Result<()> {
    corio::runtime::logging::initialize();
    let mut scheduler: Scheduler = Scheduler::new(&Config::default())?;
    let task: TaskId = scheduler.start("idle", |y: &Yielder| y.sleep(-1), 0)?;
    let remote: RemoteHandle = scheduler.remote();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.stop()
    });
    scheduler.run(false)?;
    match stopper.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("stopper thread panicked"),
    }

    corio::ensure_eq!(scheduler.state(task), Some(TaskState::Suspended));
    scheduler.kill(task)?;
    scheduler.exit()?;
    Ok(())
}

/// Tests if exit is refused while tasks are alive.
#[test]
fn exit_requires_no_tasks() -> Result<()> {
    let (mut scheduler, _, _) = sim_scheduler(DEFAULT)?;
    scheduler.start("pending", |_: &Yielder| {}, 0)?;
    let (mut other, _, _) = sim_scheduler(DEFAULT)?;
    other.start("pending", |_: &Yielder| {}, 0)?;
    corio::ensure_eq!(other.exit().map_err(|e| e.errno), Err(libc::EBUSY));
    scheduler.run(true)?;
    scheduler.exit()?;
    Ok(())
}
