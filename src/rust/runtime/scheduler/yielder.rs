// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::{
        pipe::{
            PipeReader,
            PipeWriter,
        },
        socket::Socket,
    },
    runtime::{
        engine::Resume,
        fail::Fail,
        poller::{
            PollerEvent,
            PollerObject,
        },
        scheduler::TaskId,
        sync::Lock,
    },
};
use ::libc::pid_t;
use ::std::net::SocketAddr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Task body, run on its own stack.
pub(crate) type TaskBody = Box<dyn FnOnce(&Yielder)>;

/// What a task asks of its scheduler when it hands control back.
pub(crate) enum Request {
    WaitIo {
        object: PollerObject,
        events: PollerEvent,
        timeout: i64,
    },
    WaitProc {
        pid: pid_t,
        timeout: i64,
    },
    Sleep(i64),
    Yield,
    Enter(Lock),
    Leave(Lock),
    CancelIo(PollerObject),
    Start {
        name: String,
        body: TaskBody,
        stack_size: usize,
    },
    Kill(TaskId),
    Exit,
    Stop,
    Now,
}

/// Handle through which a running task talks to its scheduler. Every call that may suspend goes through here.
pub struct Yielder<'a> {
    inner: &'a ::corosensei::Yielder<Resume, Request>,
    task: TaskId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> Yielder<'a> {
    pub(crate) fn new(inner: &'a ::corosensei::Yielder<Resume, Request>, task: TaskId) -> Self {
        Self { inner, task }
    }

    /// Identifier of the running task.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    fn suspend(&self, request: Request) -> Resume {
        self.inner.suspend(request)
    }

    fn done(&self, request: Request) -> Result<(), Fail> {
        match self.suspend(request) {
            Resume::Done(result) => result,
            _ => Err(Self::unexpected()),
        }
    }

    fn unexpected() -> Fail {
        let cause: &str = "task resumed for the wrong reason";
        error!("{}", cause);
        Fail::new(libc::EINVAL, cause)
    }

    /// Suspends until `object` is ready for `events`. Returns the ready events, which may carry [PollerEvent::EOF].
    ///
    /// `timeout` is in milliseconds: zero polls the object once without waiting, negative waits forever.
    /// Fails with ETIMEDOUT when the timeout elapses, EIO if the object reported an error, ECANCELED if the wait was
    /// cancelled and EBUSY if another task already waits for the same direction of `object`.
    pub fn wait_io(&self, object: PollerObject, events: PollerEvent, timeout: i64) -> Result<PollerEvent, Fail> {
        match self.suspend(Request::WaitIo {
            object,
            events,
            timeout,
        }) {
            Resume::Io(result) => result,
            _ => Err(Self::unexpected()),
        }
    }

    /// Suspends until process `pid` exits and returns its exit status, `-1` if it did not exit normally.
    pub fn wait_proc(&self, pid: pid_t, timeout: i64) -> Result<i32, Fail> {
        match self.suspend(Request::WaitProc { pid, timeout }) {
            Resume::Process(result) => result,
            _ => Err(Self::unexpected()),
        }
    }

    /// Suspends for `timeout` milliseconds. Zero returns at once, negative sleeps until the task is killed.
    pub fn sleep(&self, timeout: i64) {
        if timeout == 0 {
            return;
        }
        self.suspend(Request::Sleep(timeout));
    }

    /// Goes to the back of the ready queue.
    pub fn yield_now(&self) {
        self.suspend(Request::Yield);
    }

    /// Enters `lock`, suspending until it is handed over if another task owns it.
    pub fn enter(&self, lock: &Lock) -> Result<(), Fail> {
        match self.suspend(Request::Enter(lock.clone())) {
            Resume::Lock(_) => Ok(()),
            Resume::Done(result) => result,
            _ => Err(Self::unexpected()),
        }
    }

    /// Leaves `lock`. The longest waiting task becomes the owner.
    pub fn leave(&self, lock: &Lock) -> Result<(), Fail> {
        self.done(Request::Leave(lock.clone()))
    }

    /// Forgets everything known about `object`. Must be called before closing a descriptor that was waited on.
    pub fn cancel_io(&self, object: PollerObject) -> Result<(), Fail> {
        self.done(Request::CancelIo(object))
    }

    /// Starts a sibling task on the same scheduler. It runs after the current task suspends.
    pub fn start<F>(&self, name: &str, body: F, stack_size: usize) -> Result<TaskId, Fail>
    where
        F: FnOnce(&Yielder) + 'static,
    {
        match self.suspend(Request::Start {
            name: name.to_string(),
            body: Box::new(body),
            stack_size,
        }) {
            Resume::Started(result) => result,
            _ => Err(Self::unexpected()),
        }
    }

    /// Kills `task`. Killing the running task does not return.
    pub fn kill(&self, task: TaskId) -> Result<(), Fail> {
        self.done(Request::Kill(task))
    }

    /// Ends the running task on the spot. Nothing after this call runs.
    pub fn exit(&self) -> ! {
        loop {
            self.suspend(Request::Exit);
        }
    }

    /// Makes the scheduler's run loop return once this task suspends.
    pub fn stop(&self) {
        if let Err(e) = self.done(Request::Stop) {
            warn!("stop(): {:?}", e);
        }
    }

    /// Current time of the scheduler clock.
    pub fn now_ms(&self) -> u64 {
        match self.suspend(Request::Now) {
            Resume::Clock(now) => now,
            _ => 0,
        }
    }

    //==================================================================================================================
    // Cooperative I/O
    //==================================================================================================================

    /// Receives into `buf`, suspending while nothing is available. `Ok(0)` is end of file. `timeout` applies to each
    /// wait.
    pub fn recv(&self, socket: &Socket, buf: &mut [u8], timeout: i64) -> Result<usize, Fail> {
        loop {
            match socket.try_recv(buf) {
                Err(e) if e.is_would_block() => {
                    self.wait_io(socket.object(), PollerEvent::RECV, timeout)?;
                },
                result => return result,
            }
        }
    }

    /// Sends from `buf`, suspending while the send buffer is full.
    pub fn send(&self, socket: &Socket, buf: &[u8], timeout: i64) -> Result<usize, Fail> {
        loop {
            match socket.try_send(buf) {
                Err(e) if e.is_would_block() => {
                    self.wait_io(socket.object(), PollerEvent::SEND, timeout)?;
                },
                result => return result,
            }
        }
    }

    /// Sends all of `buf`.
    pub fn send_all(&self, socket: &Socket, buf: &[u8], timeout: i64) -> Result<(), Fail> {
        let mut sent: usize = 0;
        while sent < buf.len() {
            sent += self.send(socket, &buf[sent..], timeout)?;
        }
        Ok(())
    }

    /// Accepts a connection, suspending until one is pending.
    pub fn accept(&self, socket: &Socket, timeout: i64) -> Result<(Socket, Option<SocketAddr>), Fail> {
        loop {
            match socket.try_accept() {
                Err(e) if e.is_would_block() => {
                    self.wait_io(socket.object(), PollerEvent::ACCEPT, timeout)?;
                },
                result => return result,
            }
        }
    }

    /// Connects to `remote`, suspending until the connection is established.
    pub fn connect(&self, socket: &Socket, remote: SocketAddr, timeout: i64) -> Result<(), Fail> {
        match socket.try_connect(remote) {
            Err(e) if e.is_would_block() => {
                self.wait_io(socket.object(), PollerEvent::CONNECT, timeout)?;
                match socket.take_error()? {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            },
            result => result,
        }
    }

    /// Reads from a pipe, suspending while it is empty. `Ok(0)` means the write end is closed.
    pub fn read_pipe(&self, pipe: &PipeReader, buf: &mut [u8], timeout: i64) -> Result<usize, Fail> {
        loop {
            match pipe.try_read(buf) {
                Err(e) if e.is_would_block() => {
                    self.wait_io(pipe.object(), PollerEvent::RECV, timeout)?;
                },
                result => return result,
            }
        }
    }

    /// Writes to a pipe, suspending while it is full.
    pub fn write_pipe(&self, pipe: &PipeWriter, buf: &[u8], timeout: i64) -> Result<usize, Fail> {
        loop {
            match pipe.try_write(buf) {
                Err(e) if e.is_would_block() => {
                    self.wait_io(pipe.object(), PollerEvent::SEND, timeout)?;
                },
                result => return result,
            }
        }
    }
}
