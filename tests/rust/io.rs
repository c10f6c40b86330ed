// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative I/O against the real epoll poller.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::corio::{
    pal::{
        pipe::{
            pipe,
            PipeReader,
            PipeWriter,
        },
        process::Process,
        socket::Socket,
    },
    runtime::stackless::routine,
    Config,
    Fail,
    LoContext,
    LoScheduler,
    PollerEvent,
    Scheduler,
    Step,
    Yielder,
};
use ::socket2::{
    Domain,
    Type,
};
use ::std::{
    cell::RefCell,
    net::{
        Shutdown,
        SocketAddr,
    },
    process::Command,
    rc::Rc,
};

//==============================================================================
// Constants
//==============================================================================

const TIMEOUT_MS: i64 = 5000;

//==============================================================================
// Standalone Functions
//==============================================================================

fn scheduler() -> Result<Scheduler> {
    ::corio::runtime::logging::initialize();
    let config: Config = "{}".parse()?;
    Ok(Scheduler::new(&config)?)
}

/// Receives until end of file.
fn recv_to_end(y: &Yielder, socket: &Socket) -> Result<Vec<u8>, Fail> {
    let mut data: Vec<u8> = Vec::new();
    let mut buf: [u8; 1024] = [0; 1024];
    loop {
        match y.recv(socket, &mut buf, TIMEOUT_MS)? {
            0 => return Ok(data),
            n => data.extend_from_slice(&buf[..n]),
        }
    }
}

//==============================================================================
// Sockets
//==============================================================================

/// Tests if two tasks can play ping-pong over a socket pair.
#[test]
fn ping_pong_over_socket_pair() -> Result<()> {
    const NROUNDS: usize = 100;
    let mut scheduler: Scheduler = scheduler()?;
    let (left, right): (Socket, Socket) = Socket::pair()?;
    let pongs: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));

    let counter = pongs.clone();
    scheduler.start(
        "ping",
        move |y: &Yielder| {
            let mut buf: [u8; 4] = [0; 4];
            for _ in 0..NROUNDS {
                if y.send_all(&left, b"ping", TIMEOUT_MS).is_err() {
                    break;
                }
                match y.recv(&left, &mut buf, TIMEOUT_MS) {
                    Ok(4) if &buf == b"pong" => *counter.borrow_mut() += 1,
                    _ => break,
                }
            }
            let _ = y.cancel_io(left.object());
        },
        0,
    )?;
    scheduler.start(
        "pong",
        move |y: &Yielder| {
            let mut buf: [u8; 4] = [0; 4];
            for _ in 0..NROUNDS {
                match y.recv(&right, &mut buf, TIMEOUT_MS) {
                    Ok(4) if &buf == b"ping" => {},
                    _ => break,
                }
                if y.send_all(&right, b"pong", TIMEOUT_MS).is_err() {
                    break;
                }
            }
            let _ = y.cancel_io(right.object());
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*pongs.borrow(), NROUNDS);
    scheduler.exit()?;
    Ok(())
}

/// Tests if a TCP client and server on the same scheduler can connect and echo.
#[test]
fn tcp_echo_on_loopback() -> Result<()> {
    let mut scheduler: Scheduler = scheduler()?;
    let listener: Socket = Socket::new(Domain::IPV4, Type::STREAM)?;
    let any: SocketAddr = "127.0.0.1:0".parse()?;
    listener.bind(any)?;
    listener.listen(16)?;
    let local: SocketAddr = listener.local_addr()?;

    scheduler.start(
        "server",
        move |y: &Yielder| {
            if let Ok((connection, _)) = y.accept(&listener, TIMEOUT_MS) {
                if let Ok(data) = recv_to_end(y, &connection) {
                    let _ = y.send_all(&connection, &data, TIMEOUT_MS);
                }
                let _ = y.cancel_io(connection.object());
            }
            let _ = y.cancel_io(listener.object());
        },
        0,
    )?;

    let echoed: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let out = echoed.clone();
    scheduler.start(
        "client",
        move |y: &Yielder| {
            let socket: Socket = match Socket::new(Domain::IPV4, Type::STREAM) {
                Ok(socket) => socket,
                Err(_) => return,
            };
            let sent: Result<Vec<u8>, Fail> = y
                .connect(&socket, local, TIMEOUT_MS)
                .and_then(|_| y.send_all(&socket, b"hello corio", TIMEOUT_MS))
                .and_then(|_| socket.shutdown(Shutdown::Write))
                .and_then(|_| recv_to_end(y, &socket));
            if let Ok(data) = sent {
                *out.borrow_mut() = data;
            }
            let _ = y.cancel_io(socket.object());
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(echoed.borrow().as_slice(), b"hello corio".as_slice());
    scheduler.exit()?;
    Ok(())
}

/// Tests if a reader sees end of file once its peer hangs up.
#[test]
fn recv_returns_zero_after_hang_up() -> Result<()> {
    let mut scheduler: Scheduler = scheduler()?;
    let (reader, writer): (Socket, Socket) = Socket::pair()?;
    let results: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    let out = results.clone();
    scheduler.start(
        "reader",
        move |y: &Yielder| {
            let mut buf: [u8; 16] = [0; 16];
            // The second and third receives both see the hang-up.
            for _ in 0..3 {
                match y.recv(&reader, &mut buf, TIMEOUT_MS) {
                    Ok(n) => out.borrow_mut().push(n),
                    Err(_) => break,
                }
            }
            let _ = y.cancel_io(reader.object());
        },
        0,
    )?;
    scheduler.start(
        "writer",
        move |y: &Yielder| {
            y.sleep(10);
            let _ = y.send_all(&writer, b"bye", TIMEOUT_MS);
            let _ = y.cancel_io(writer.object());
            drop(writer);
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*results.borrow(), vec![3, 0, 0]);
    Ok(())
}

/// Tests if a zero timeout sees data that arrived before the object was ever waited on.
#[test]
fn zero_timeout_sees_unreported_readiness() -> Result<()> {
    let mut scheduler: Scheduler = scheduler()?;
    let (left, right): (Socket, Socket) = Socket::pair()?;
    left.try_send(b"x")?;
    let results: Rc<RefCell<Vec<Result<bool, i32>>>> = Rc::new(RefCell::new(Vec::new()));

    let out = results.clone();
    scheduler.start(
        "prober",
        move |y: &Yielder| {
            let first = y.wait_io(right.object(), PollerEvent::RECV, 0);
            out.borrow_mut()
                .push(first.map(|events| events.contains(PollerEvent::RECV)).map_err(|e| e.errno));
            let mut buf: [u8; 8] = [0; 8];
            let _ = right.try_recv(&mut buf);
            // Drained, so the next look finds nothing.
            let second = y.wait_io(right.object(), PollerEvent::RECV, 0);
            out.borrow_mut()
                .push(second.map(|events| events.contains(PollerEvent::RECV)).map_err(|e| e.errno));
            let _ = y.cancel_io(right.object());
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*results.borrow(), vec![Ok(true), Err(libc::ETIMEDOUT)]);
    drop(left);
    scheduler.exit()?;
    Ok(())
}

//==============================================================================
// Pipes
//==============================================================================

/// Tests if a writer that fills a pipe is suspended until the reader drains it.
#[test]
fn pipe_transfer_larger_than_buffer() -> Result<()> {
    const TOTAL: usize = 1 << 20;
    let mut scheduler: Scheduler = scheduler()?;
    let (reader, writer): (PipeReader, PipeWriter) = pipe()?;
    let received: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));

    scheduler.start(
        "writer",
        move |y: &Yielder| {
            let chunk: Vec<u8> = vec![0xa5; 16 * 1024];
            let mut written: usize = 0;
            while written < TOTAL {
                let len: usize = chunk.len().min(TOTAL - written);
                match y.write_pipe(&writer, &chunk[..len], TIMEOUT_MS) {
                    Ok(n) => written += n,
                    Err(_) => break,
                }
            }
            let _ = y.cancel_io(writer.object());
        },
        0,
    )?;
    let out = received.clone();
    scheduler.start(
        "reader",
        move |y: &Yielder| {
            let mut buf: Vec<u8> = vec![0; 4096];
            loop {
                match y.read_pipe(&reader, &mut buf, TIMEOUT_MS) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => *out.borrow_mut() += n,
                }
            }
            let _ = y.cancel_io(reader.object());
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*received.borrow(), TOTAL);
    scheduler.exit()?;
    Ok(())
}

//==============================================================================
// Processes
//==============================================================================

/// Tests if a task learns the exit status of a child process.
#[test]
fn wait_for_child_exit_status() -> Result<()> {
    let mut scheduler: Scheduler = scheduler()?;
    let process: Process = Process::spawn(Command::new("sh").args(["-c", "sleep 0.05; exit 3"]))?;
    let pid = process.pid();
    let status: Rc<RefCell<Option<Result<i32, i32>>>> = Rc::new(RefCell::new(None));

    let out = status.clone();
    scheduler.start(
        "reaper",
        move |y: &Yielder| {
            *out.borrow_mut() = Some(y.wait_proc(pid, TIMEOUT_MS).map_err(|e| e.errno));
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*status.borrow(), Some(Ok(3)));
    scheduler.exit()?;
    Ok(())
}

/// Tests if a process wait times out, and if the process can still be waited for after it is killed.
#[test]
fn wait_for_child_times_out_then_kill() -> Result<()> {
    let mut scheduler: Scheduler = scheduler()?;
    let process: Process = Process::spawn(Command::new("sleep").arg("10"))?;
    let results: Rc<RefCell<Vec<Result<i32, i32>>>> = Rc::new(RefCell::new(Vec::new()));

    let out = results.clone();
    scheduler.start(
        "reaper",
        move |y: &Yielder| {
            out.borrow_mut().push(y.wait_proc(process.pid(), 50).map_err(|e| e.errno));
            if process.signal(libc::SIGKILL).is_ok() {
                out.borrow_mut().push(y.wait_proc(process.pid(), TIMEOUT_MS).map_err(|e| e.errno));
            }
        },
        0,
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(*results.borrow(), vec![Err(libc::ETIMEDOUT), Ok(-1)]);
    Ok(())
}

//==============================================================================
// Stackless
//==============================================================================

/// Tests if a stackless routine is woken when its socket becomes readable.
#[test]
fn stackless_routine_reads_socket() -> Result<()> {
    ::corio::runtime::logging::initialize();
    let config: Config = "{}".parse()?;
    let mut scheduler: LoScheduler = LoScheduler::new(&config)?;
    let (left, right): (Socket, Socket) = Socket::pair()?;
    let left: Rc<Socket> = Rc::new(left);

    let sender: Rc<Socket> = left.clone();
    scheduler.post_timer(10, false, move || {
        let _ = sender.try_send(b"ping");
    });

    let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let out = received.clone();
    let mut waiting: bool = false;
    scheduler.start(
        "reader",
        routine(move |cx: &mut LoContext| {
            if !waiting {
                waiting = true;
                if cx.wait_sock(&right, PollerEvent::RECV, TIMEOUT_MS) {
                    return Step::Pending;
                }
            }
            if let Some(Ok(events)) = cx.io_result() {
                if events.contains(PollerEvent::RECV) {
                    let mut buf: [u8; 16] = [0; 16];
                    if let Ok(n) = right.try_recv(&mut buf) {
                        out.borrow_mut().extend_from_slice(&buf[..n]);
                    }
                }
            }
            let _ = cx.cancel_io(right.object());
            Step::Ready(())
        }),
    )?;
    scheduler.run(true)?;

    corio::ensure_eq!(received.borrow().as_slice(), b"ping".as_slice());
    scheduler.exit()?;
    Ok(())
}
