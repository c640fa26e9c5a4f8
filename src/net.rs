//! Listener collaborator.
//!
//! The accept loop only needs something that yields connected byte streams
//! one at a time. `TcpListener` is the production source; tests plug in
//! in-memory sources.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

const LISTEN_BACKLOG: i32 = 1024;

/// A duplex byte stream the echo loop can own.
pub trait EchoStream: AsyncRead + AsyncWrite + Unpin {}

impl<T: AsyncRead + AsyncWrite + Unpin> EchoStream for T {}

/// Source of inbound connections.
///
/// `accept` suspends until a connection is available and fails only when the
/// listener can no longer produce connections.
pub trait Listener {
    type Stream: EchoStream + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>>;
}

impl Listener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> {
        tokio::net::TcpListener::accept(self)
    }
}

/// Create a non-blocking std listener bound to `addr`.
///
/// Shared by both reactor backends; each wraps the socket in its own
/// listener type.
pub fn bind_std(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Bind a tokio listener. Must be called from within a runtime context.
pub fn bind(addr: SocketAddr) -> io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::from_std(bind_std(addr)?)
}
