// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Pool of threads that each run an independent [Scheduler].
//!
//! Schedulers share nothing. Items are handed to workers through channels, and each worker has a notifier that its
//! dispatcher task waits on, so a worker that has nothing to do sleeps in its poller like any other scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::notifier::Notifier,
    runtime::{
        config::Config,
        fail::Fail,
        poller::PollerEvent,
        scheduler::{
            Scheduler,
            Yielder,
        },
    },
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
    TryRecvError,
};
use ::std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct Worker<T> {
    sender: Sender<T>,
    notifier: Arc<Notifier>,
    thread: JoinHandle<Result<(), Fail>>,
}

/// Threads running one scheduler each, fed round-robin.
pub struct WorkerPool<T: Send + 'static> {
    workers: Vec<Worker<T>>,
    next: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `count` workers, the configured number if zero. Every item dispatched to a worker is handled by a new
    /// task on that worker running `handler`.
    pub fn new<H>(config: &Config, count: usize, handler: H) -> Result<Self, Fail>
    where
        H: Fn(&Yielder, T) + Send + Sync + 'static,
    {
        let count: usize = if count == 0 { config.worker_count()? } else { count };
        let handler: Arc<H> = Arc::new(handler);

        let mut workers: Vec<Worker<T>> = Vec::with_capacity(count);
        for index in 0..count {
            let (sender, receiver): (Sender<T>, Receiver<T>) = ::crossbeam_channel::unbounded();
            let notifier: Arc<Notifier> = Arc::new(Notifier::new()?);
            // Reports whether the worker managed to set its scheduler up.
            let (ready_tx, ready_rx): (Sender<Result<(), Fail>>, Receiver<Result<(), Fail>>) =
                ::crossbeam_channel::bounded(1);

            let config: Config = config.clone();
            let worker_notifier: Arc<Notifier> = notifier.clone();
            let handler: Arc<H> = handler.clone();
            let thread: JoinHandle<Result<(), Fail>> = thread::Builder::new()
                .name(format!("corio-worker-{}", index))
                .spawn(move || Self::work(index, config, receiver, worker_notifier, handler, ready_tx))?;

            let started: Result<(), Fail> = match ready_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(Fail::new(libc::EIO, "worker exited during startup")),
            };
            if let Err(e) = started {
                error!("new(): worker {:?} failed to start: {:?}", index, e);
                // Let the workers that did start wind down.
                if let Err(e) = (Self { workers, next: 0 }).shutdown() {
                    warn!("new(): {:?}", e);
                }
                return Err(e);
            }
            workers.push(Worker {
                sender,
                notifier,
                thread,
            });
        }

        Ok(Self { workers, next: 0 })
    }

    fn work<H>(
        index: usize,
        config: Config,
        receiver: Receiver<T>,
        notifier: Arc<Notifier>,
        handler: Arc<H>,
        ready: Sender<Result<(), Fail>>,
    ) -> Result<(), Fail>
    where
        H: Fn(&Yielder, T) + Send + Sync + 'static,
    {
        let mut scheduler: Scheduler = match Scheduler::new(&config) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                let _ = ready.send(Err(e.clone()));
                return Err(e);
            },
        };
        let dispatcher = move |y: &Yielder| loop {
            match receiver.try_recv() {
                Ok(item) => {
                    let handler: Arc<H> = handler.clone();
                    if let Err(e) = y.start("worker::handler", move |y: &Yielder| (*handler)(y, item), 0) {
                        warn!("dispatcher(): cannot start handler: {:?}", e);
                    }
                },
                Err(TryRecvError::Empty) => {
                    notifier.drain();
                    if receiver.is_empty() {
                        if let Err(e) = y.wait_io(notifier.object(), PollerEvent::RECV, -1) {
                            error!("dispatcher(): wait failed: {:?}", e);
                            return;
                        }
                    }
                },
                Err(TryRecvError::Disconnected) => {
                    trace!("dispatcher(): pool shut down");
                    return;
                },
            }
        };
        scheduler.start("worker::dispatcher", dispatcher, 0)?;
        let _ = ready.send(Ok(()));

        trace!("work(): worker {:?} running", index);
        scheduler.run(true)?;
        scheduler.exit()
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Hands `item` to the next worker in turn.
    pub fn dispatch(&mut self, item: T) -> Result<(), Fail> {
        if self.workers.is_empty() {
            return Err(Fail::new(libc::ENODEV, "no workers"));
        }
        let worker: &Worker<T> = &self.workers[self.next];
        self.next = (self.next + 1) % self.workers.len();
        if worker.sender.send(item).is_err() {
            let cause: &str = "worker is gone";
            error!("dispatch(): {}", cause);
            return Err(Fail::new(libc::EPIPE, cause));
        }
        worker.notifier.notify()
    }

    /// Disconnects every worker and waits for all of them to finish the items they were given.
    pub fn shutdown(self) -> Result<(), Fail> {
        let mut result: Result<(), Fail> = Ok(());
        let mut threads: Vec<(Arc<Notifier>, JoinHandle<Result<(), Fail>>)> = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            drop(worker.sender);
            threads.push((worker.notifier, worker.thread));
        }
        for (notifier, thread) in threads {
            if let Err(e) = notifier.notify() {
                warn!("shutdown(): {:?}", e);
            }
            match thread.join() {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    error!("shutdown(): worker failed: {:?}", e);
                    result = Err(e);
                },
                Err(_) => {
                    error!("shutdown(): worker panicked");
                    result = Err(Fail::new(libc::EIO, "worker panicked"));
                },
            }
        }
        result
    }
}
