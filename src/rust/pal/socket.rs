// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal,
    runtime::{
        fail::Fail,
        poller::PollerObject,
    },
};
use ::libc::ENOTSUP;
use ::socket2::{
    Domain,
    Protocol,
    SockAddr,
    Type,
};
use ::std::{
    io::{
        Read,
        Write,
    },
    net::{
        Shutdown,
        SocketAddr,
    },
    os::fd::{
        AsRawFd,
        RawFd,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Non-blocking socket.
pub struct Socket(socket2::Socket);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Socket {
    /// Creates a non-blocking TCP or UDP socket.
    pub fn new(domain: Domain, typ: Type) -> Result<Self, Fail> {
        // Select protocol.
        let protocol: Protocol = match typ {
            Type::STREAM => Protocol::TCP,
            Type::DGRAM => Protocol::UDP,
            _ => {
                return Err(Fail::new(ENOTSUP, "socket type not supported"));
            },
        };

        match socket2::Socket::new(domain, typ, Some(protocol)) {
            Ok(socket) => {
                if socket.set_reuse_address(true).is_err() {
                    warn!("cannot set REUSE_ADDRESS option");
                }
                Self::from_socket2(socket)
            },
            Err(e) => {
                error!("failed to create socket ({:?})", e);
                Err(Fail::from(e))
            },
        }
    }

    /// Creates a pair of connected non-blocking stream sockets.
    pub fn pair() -> Result<(Self, Self), Fail> {
        let (a, b): (socket2::Socket, socket2::Socket) = socket2::Socket::pair(Domain::UNIX, Type::STREAM, None)?;
        Ok((Self::from_socket2(a)?, Self::from_socket2(b)?))
    }

    /// Takes over a socket and switches it to non-blocking mode.
    pub fn from_socket2(socket: socket2::Socket) -> Result<Self, Fail> {
        socket.set_nonblocking(true)?;
        Ok(Self(socket))
    }

    pub fn bind(&self, local: SocketAddr) -> Result<(), Fail> {
        self.0.bind(&local.into()).map_err(|e| {
            error!("failed to bind socket ({:?})", e);
            Fail::from(e)
        })
    }

    pub fn listen(&self, backlog: i32) -> Result<(), Fail> {
        self.0.listen(backlog).map_err(|e| {
            error!("failed to listen ({:?})", e);
            Fail::from(e)
        })
    }

    /// Accepts a pending connection. Fails with EAGAIN if there is none.
    pub fn try_accept(&self) -> Result<(Socket, Option<SocketAddr>), Fail> {
        match self.0.accept() {
            Ok((socket, addr)) => {
                let addr: Option<SocketAddr> = addr.as_socket();
                trace!("connection accepted ({:?})", addr);
                Ok((Self::from_socket2(socket)?, addr))
            },
            Err(e) => Err(pal::io_failure(e, "failed to accept")),
        }
    }

    /// Starts connecting to `remote`. Fails with EAGAIN while the connection is in progress.
    pub fn try_connect(&self, remote: SocketAddr) -> Result<(), Fail> {
        match self.0.connect(&SockAddr::from(remote)) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EISCONN) => Ok(()),
            Err(e) => Err(pal::io_failure(e, "failed to connect")),
        }
    }

    /// Receives into `buf`. `Ok(0)` is end of file; EAGAIN means nothing is available yet.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        match (&self.0).read(buf) {
            Ok(nbytes) => {
                if nbytes > 0 {
                    trace!("data received ({:?}/{:?} bytes)", nbytes, buf.len());
                } else {
                    trace!("remote closing connection");
                }
                Ok(nbytes)
            },
            Err(e) => Err(pal::io_failure(e, "failed to receive")),
        }
    }

    /// Sends from `buf`. EAGAIN means the send buffer is full.
    pub fn try_send(&self, buf: &[u8]) -> Result<usize, Fail> {
        match (&self.0).write(buf) {
            Ok(nbytes) => {
                trace!("data pushed ({:?}/{:?} bytes)", nbytes, buf.len());
                Ok(nbytes)
            },
            Err(e) => Err(pal::io_failure(e, "failed to send")),
        }
    }

    /// Reads and clears the pending socket error, as left by an asynchronous connect.
    pub fn take_error(&self) -> Result<Option<Fail>, Fail> {
        Ok(self.0.take_error()?.map(Fail::from))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Fail> {
        match self.0.local_addr()?.as_socket() {
            Some(addr) => Ok(addr),
            None => Err(Fail::new(libc::EAFNOSUPPORT, "not an internet socket")),
        }
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<(), Fail> {
        match self.0.shutdown(how) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => Ok(()),
            Err(e) => Err(Fail::from(e)),
        }
    }

    /// The socket as a waitable object.
    pub fn object(&self) -> PollerObject {
        PollerObject::Socket(self.0.as_raw_fd())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
