// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::{
        self,
        notifier::Notifier,
    },
    runtime::{
        fail::Fail,
        poller::{
            Poller,
            PollerEntry,
            PollerEvent,
            PollerObject,
            PollerWaker,
            Registration,
        },
    },
};
use ::libc::{
    c_int,
    epoll_event,
    pid_t,
    EPOLLERR,
    EPOLLET,
    EPOLLHUP,
    EPOLLIN,
    EPOLLONESHOT,
    EPOLLOUT,
    EPOLLPRI,
    EPOLLRDHUP,
    EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
    EPOLL_CTL_MOD,
};
use ::std::{
    collections::HashMap,
    os::fd::{
        AsRawFd,
        FromRawFd,
        OwnedFd,
        RawFd,
    },
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Poller backed by Linux epoll. Processes are watched through pidfds.
pub struct EpollPoller {
    epoll_fd: OwnedFd,
    events: Vec<epoll_event>,
    notifier: Arc<Notifier>,
    // Registered objects, keyed by the descriptor that epoll reports.
    objects: HashMap<RawFd, (PollerObject, u64)>,
    pidfds: HashMap<pid_t, OwnedFd>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl EpollPoller {
    /// Creates a poller that returns at most `capacity` events per wait.
    pub fn new(capacity: usize) -> Result<Self, Fail> {
        let fd: RawFd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            let fail: Fail = Fail::last_os_error("failed to create epoll");
            error!("new(): {:?}", fail);
            return Err(fail);
        }
        // Safety: the descriptor was just created and is owned by nobody else.
        let epoll_fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(fd) };

        let me: Self = Self {
            epoll_fd,
            events: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            notifier: Arc::new(Notifier::new()?),
            objects: HashMap::new(),
            pidfds: HashMap::new(),
        };
        me.ctl(EPOLL_CTL_ADD, me.notifier.as_raw_fd(), EPOLLIN as u32)?;
        Ok(me)
    }

    fn ctl(&self, op: c_int, fd: RawFd, mask: u32) -> Result<(), Fail> {
        let mut event: epoll_event = epoll_event {
            events: mask,
            u64: fd as u64,
        };
        match unsafe { libc::epoll_ctl(self.epoll_fd.as_raw_fd(), op, fd, &mut event) } {
            0 => Ok(()),
            _ => Err(Fail::last_os_error("epoll_ctl failed")),
        }
    }

    fn to_epoll(events: PollerEvent) -> u32 {
        let mut mask: u32 = 0;
        if events.contains(PollerEvent::RECV) {
            mask |= EPOLLIN as u32;
        }
        if events.contains(PollerEvent::SEND) {
            mask |= EPOLLOUT as u32;
        }
        if events.contains(PollerEvent::CLEAR) {
            mask |= (EPOLLET | EPOLLRDHUP) as u32;
        }
        if events.contains(PollerEvent::ONESHOT) {
            mask |= EPOLLONESHOT as u32;
        }
        mask
    }

    fn from_epoll(mask: u32) -> PollerEvent {
        let mut events: PollerEvent = PollerEvent::empty();
        if mask & ((EPOLLIN | EPOLLPRI) as u32) != 0 {
            events |= PollerEvent::RECV;
        }
        if mask & (EPOLLOUT as u32) != 0 {
            events |= PollerEvent::SEND;
        }
        // A hang-up or error with no direction wakes both, the next I/O call reports what happened.
        if mask & ((EPOLLHUP | EPOLLERR) as u32) != 0 && events.directions().is_empty() {
            events |= PollerEvent::RECV | PollerEvent::SEND;
        }
        if mask & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0 {
            events |= PollerEvent::EOF;
        }
        events
    }

    fn remove_process(&mut self, pid: pid_t) {
        if let Some(pidfd) = self.pidfds.remove(&pid) {
            let fd: RawFd = pidfd.as_raw_fd();
            if let Err(e) = self.ctl(EPOLL_CTL_DEL, fd, 0) {
                warn!("remove_process(): pid={:?} {:?}", pid, e);
            }
            self.objects.remove(&fd);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Poller for EpollPoller {
    // Both edge-triggered and oneshot registrations map onto epoll flags.
    fn supports(&self, _events: PollerEvent) -> bool {
        true
    }

    fn register(&mut self, object: PollerObject, events: PollerEvent, opaque: u64) -> Result<Registration, Fail> {
        let fd: RawFd = match object {
            PollerObject::Socket(fd) | PollerObject::Pipe(fd) => {
                self.ctl(EPOLL_CTL_ADD, fd, Self::to_epoll(events))?;
                fd
            },
            PollerObject::Process(pid) => {
                if self.pidfds.contains_key(&pid) {
                    return Err(Fail::new(libc::EEXIST, "process already registered"));
                }
                let pidfd: OwnedFd = pal::process::pidfd_open(pid)?;
                let fd: RawFd = pidfd.as_raw_fd();
                self.ctl(EPOLL_CTL_ADD, fd, EPOLLIN as u32)?;
                self.pidfds.insert(pid, pidfd);
                fd
            },
        };
        trace!("register(): object={:?} events={:?}", object, events);
        self.objects.insert(fd, (object, opaque));
        Ok(Registration::new(object))
    }

    fn modify(&mut self, registration: &Registration, events: PollerEvent, opaque: u64) -> Result<(), Fail> {
        let object: PollerObject = registration.object();
        let fd: RawFd = match object {
            PollerObject::Socket(fd) | PollerObject::Pipe(fd) => {
                self.ctl(EPOLL_CTL_MOD, fd, Self::to_epoll(events))?;
                fd
            },
            PollerObject::Process(pid) => match self.pidfds.get(&pid) {
                Some(pidfd) => pidfd.as_raw_fd(),
                None => return Err(Fail::new(libc::ENOENT, "process not registered")),
            },
        };
        trace!("modify(): object={:?} events={:?}", object, events);
        self.objects.insert(fd, (object, opaque));
        Ok(())
    }

    fn unregister(&mut self, registration: Registration) -> Result<(), Fail> {
        let object: PollerObject = registration.object();
        trace!("unregister(): object={:?}", object);
        match object {
            PollerObject::Socket(fd) | PollerObject::Pipe(fd) => {
                self.objects.remove(&fd);
                match self.ctl(EPOLL_CTL_DEL, fd, 0) {
                    Ok(()) => Ok(()),
                    // Closing a descriptor removes it from epoll on its own.
                    Err(e) if e.errno == libc::ENOENT || e.errno == libc::EBADF => Ok(()),
                    Err(e) => Err(e),
                }
            },
            PollerObject::Process(pid) => {
                self.remove_process(pid);
                Ok(())
            },
        }
    }

    fn wait(&mut self, buffer: &mut Vec<PollerEntry>, max_events: usize, timeout_ms: i64) -> Result<usize, Fail> {
        let maxn: usize = max_events.clamp(1, self.events.len());
        let timeout: c_int = if timeout_ms < 0 {
            -1
        } else {
            timeout_ms.min(c_int::MAX as i64) as c_int
        };

        let nevents: c_int = unsafe {
            libc::epoll_wait(
                self.epoll_fd.as_raw_fd(),
                self.events.as_mut_ptr(),
                maxn as c_int,
                timeout,
            )
        };
        if nevents < 0 {
            let fail: Fail = Fail::last_os_error("epoll_wait failed");
            if fail.errno == libc::EINTR {
                return Ok(0);
            }
            return Err(fail);
        }

        let mut count: usize = 0;
        for i in 0..nevents as usize {
            let event: epoll_event = self.events[i];
            let mask: u32 = event.events;
            let fd: RawFd = event.u64 as RawFd;

            if fd == self.notifier.as_raw_fd() {
                trace!("wait(): woken up");
                self.notifier.drain();
                continue;
            }

            let (object, opaque): (PollerObject, u64) = match self.objects.get(&fd) {
                Some(entry) => *entry,
                None => continue,
            };

            let entry: PollerEntry = match object {
                PollerObject::Process(pid) => {
                    let status: Option<i32> = match pal::process::try_reap(pid) {
                        Ok(Some(status)) => Some(status),
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("wait(): cannot collect status of pid={:?} ({:?})", pid, e);
                            None
                        },
                    };
                    self.remove_process(pid);
                    PollerEntry {
                        object,
                        opaque,
                        events: if status.is_some() {
                            PollerEvent::RECV
                        } else {
                            PollerEvent::RECV | PollerEvent::ERROR
                        },
                        status,
                    }
                },
                _ => PollerEntry {
                    object,
                    opaque,
                    events: Self::from_epoll(mask),
                    status: None,
                },
            };
            buffer.push(entry);
            count += 1;
        }
        Ok(count)
    }

    fn reap(&mut self, pid: pid_t) -> Result<Option<i32>, Fail> {
        pal::process::try_reap(pid)
    }

    fn waker(&self) -> PollerWaker {
        PollerWaker::new(self.notifier.clone())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
