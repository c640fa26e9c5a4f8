//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then each
//! connection's `EchoConn` is stepped with non-blocking read/write calls
//! until the next operation would block. Every connection is registered for both
//! readable and writable interest once; the state decides which readiness
//! matters, so no re-registration is needed between reads and writes.
//!
//! Registrations are edge-triggered, so a step must always run until
//! `WouldBlock` or the connection finishes.

use crate::error::ServerError;
use crate::net;
use crate::runtime::{EchoConn, HalfClose, Progress};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);
const EVENT_CAPACITY: usize = 1024;

/// Per-connection state for the mio backend.
struct MioConnection {
    echo: EchoConn<TcpStream>,
    peer: SocketAddr,
}

impl HalfClose for TcpStream {
    fn close_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// Requests shutdown of a running `EventLoop` from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Single-threaded echo server event loop.
pub struct EventLoop {
    poll: Poll,
    /// `None` once accepting has stopped.
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    connections: Slab<MioConnection>,
    buffer_size: usize,
    grace_period: Duration,
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl EventLoop {
    /// Bind the listener and register it with a fresh poll instance.
    pub fn bind(
        addr: SocketAddr,
        buffer_size: usize,
        grace_period: Duration,
    ) -> Result<Self, ServerError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let std_listener =
            net::bind_std(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let mut listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener: Some(listener),
            local_addr,
            connections: Slab::new(),
            buffer_size,
            grace_period,
            requested: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: Arc::clone(&self.requested),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run until shutdown has drained, or until a listener failure and every
    /// connection open at that point has closed.
    pub fn run(mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        let mut accept_error: Option<io::Error> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            if self.listener.is_none() {
                if self.connections.is_empty() {
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!(
                        remaining = self.connections.len(),
                        grace_period = ?self.grace_period,
                        "Grace period elapsed, dropping open connections"
                    );
                    break;
                }
            }

            let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => {
                        if let Err(e) = self.accept_connections() {
                            error!(error = %e, "Accept loop terminated");
                            self.stop_accepting();
                            accept_error = Some(e);
                        }
                    }
                    Token(conn_id) => {
                        if let Err(e) = self.drive(conn_id) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_connection(conn_id);
                        }
                    }
                }
            }

            if deadline.is_none() && self.requested.load(Ordering::Acquire) {
                if self.listener.is_some() {
                    info!("Stopped accepting connections");
                }
                self.stop_accepting();
                if !self.connections.is_empty() {
                    info!(
                        active = self.connections.len(),
                        "Waiting for open connections to close"
                    );
                }
                deadline = Some(Instant::now() + self.grace_period);
            }
        }

        match accept_error {
            Some(e) => Err(ServerError::Accept(e)),
            None => Ok(()),
        }
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(());
        };

        loop {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    let entry = self.connections.vacant_entry();
                    let conn_id = entry.key();

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(conn_id),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        debug!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    entry.insert(MioConnection {
                        echo: EchoConn::new(stream, self.buffer_size),
                        peer,
                    });

                    debug!(
                        conn_id,
                        peer = %peer,
                        active = self.connections.len(),
                        "New connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Step one connection until it would block or finishes.
    fn drive(&mut self, conn_id: usize) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        if conn.echo.step()? == Progress::Blocked {
            return Ok(());
        }

        debug!(
            conn_id,
            peer = %conn.peer,
            reads = conn.echo.stats.reads,
            bytes = conn.echo.stats.bytes,
            "Connection closed"
        );
        self.close_connection(conn_id);
        Ok(())
    }

    fn stop_accepting(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
        }
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.echo.stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::thread;

    type RunHandle = thread::JoinHandle<Result<(), ServerError>>;

    fn start(grace_period: Duration) -> (SocketAddr, ShutdownHandle, RunHandle) {
        let event_loop =
            EventLoop::bind("127.0.0.1:0".parse().unwrap(), 64, grace_period).unwrap();
        let addr = event_loop.local_addr();
        let handle = event_loop.shutdown_handle();
        let join = thread::spawn(move || event_loop.run());
        (addr, handle, join)
    }

    fn connect(addr: SocketAddr) -> StdTcpStream {
        let stream = StdTcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn echo_round(stream: &mut StdTcpStream, data: &[u8]) {
        stream.write_all(data).unwrap();
        let mut buf = vec![0u8; data.len()];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_echo_and_half_close() {
        let (addr, handle, join) = start(Duration::from_secs(1));

        let mut client = connect(addr);
        echo_round(&mut client, b"AB");
        echo_round(&mut client, b"CD");
        client.shutdown(Shutdown::Write).unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_payload_larger_than_buffer() {
        let (addr, handle, join) = start(Duration::from_secs(1));

        let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let mut client = connect(addr);
        let mut writer = client.try_clone().unwrap();

        let expected = payload.clone();
        let sender = thread::spawn(move || {
            writer.write_all(&expected).unwrap();
            writer.shutdown(Shutdown::Write).unwrap();
        });

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).unwrap();
        sender.join().unwrap();
        assert_eq!(echoed, payload);

        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_abrupt_close_is_isolated() {
        let (addr, handle, join) = start(Duration::from_secs(1));

        let mut healthy = connect(addr);
        echo_round(&mut healthy, b"before");

        {
            let mut abrupt = connect(addr);
            abrupt.write_all(b"dropped without reading").unwrap();
        }

        echo_round(&mut healthy, b"after");
        let mut late = connect(addr);
        echo_round(&mut late, b"late");

        handle.shutdown().unwrap();
        drop(healthy);
        drop(late);
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_idle_connections_do_not_block_accept() {
        let (addr, handle, join) = start(Duration::from_secs(1));

        let idle: Vec<StdTcpStream> = (0..50).map(|_| connect(addr)).collect();
        let mut active = connect(addr);
        echo_round(&mut active, b"still accepting");

        drop(idle);
        drop(active);
        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_grace_period_bounds_shutdown() {
        let (addr, handle, join) = start(Duration::from_millis(100));

        let mut stuck = connect(addr);
        echo_round(&mut stuck, b"hi");

        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();

        // The server dropped the connection once the grace period ran out.
        let mut rest = Vec::new();
        let _ = stuck.read_to_end(&mut rest);
        assert!(rest.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_listener_failure_surfaces_after_drain() {
        use std::os::fd::{AsRawFd, BorrowedFd};

        let event_loop =
            EventLoop::bind("127.0.0.1:0".parse().unwrap(), 64, Duration::from_secs(1)).unwrap();
        let addr = event_loop.local_addr();
        let listener_fd = event_loop.listener.as_ref().unwrap().as_raw_fd();
        let join = thread::spawn(move || event_loop.run());

        let mut open = connect(addr);
        echo_round(&mut open, b"ping");

        // Shutting down a listening socket wakes the poller and makes the
        // next accept fail with EINVAL. The event loop keeps the fd open
        // until it handles that failure.
        let fd = unsafe { BorrowedFd::borrow_raw(listener_fd) };
        socket2::SockRef::from(&fd).shutdown(Shutdown::Read).unwrap();

        echo_round(&mut open, b"still echoing");
        assert!(!join.is_finished());

        open.shutdown(Shutdown::Write).unwrap();
        let mut rest = Vec::new();
        open.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        match join.join().unwrap() {
            Err(ServerError::Accept(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_stops_accepting() {
        let (addr, handle, join) = start(Duration::from_secs(1));
        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();

        assert!(StdTcpStream::connect(addr).is_err());
    }
}
