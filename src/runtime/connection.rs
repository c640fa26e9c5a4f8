//! Connection state machine for the mio event loop.
//!
//! Each connection is always in exactly one state, which decides the single
//! operation it may have outstanding: a read, or the write of the bytes from
//! the last read.

use crate::protocols::echo::EchoStats;
use std::io::{self, Read, Write};
use tracing::trace;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for data to be read.
    Reading,
    /// Writing back the bytes from the last read.
    Echoing {
        /// Bytes already written.
        written: usize,
        /// Total bytes to write.
        total: usize,
    },
    /// Peer sent end-of-stream and our write half is closed.
    HalfClosed,
}

impl ConnState {
    /// Transition to echoing `total` freshly read bytes.
    pub fn start_echo(&mut self, total: usize) {
        debug_assert!(matches!(self, ConnState::Reading));
        *self = ConnState::Echoing { written: 0, total };
    }

    /// Record `n` bytes written. Returns to `Reading` once the echo is done.
    pub fn advance(&mut self, n: usize) {
        if let ConnState::Echoing { written, total } = *self {
            let written = written + n;
            *self = if written >= total {
                ConnState::Reading
            } else {
                ConnState::Echoing { written, total }
            };
        }
    }

    /// Mark the write half closed after end-of-stream.
    pub fn half_close(&mut self) {
        *self = ConnState::HalfClosed;
    }
}

/// Streams whose outbound direction can be closed on its own.
pub trait HalfClose {
    fn close_write(&self) -> io::Result<()>;
}

/// Result of stepping a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The next operation would block; wait for readiness.
    Blocked,
    /// Write half closed after end-of-stream; the connection is done.
    Finished,
}

/// Non-blocking echo connection: stream, state and the pending bytes.
pub struct EchoConn<S> {
    pub stream: S,
    pub state: ConnState,
    /// Holds the bytes of the last read until they are written back.
    buf: Vec<u8>,
    pub stats: EchoStats,
}

impl<S: Read + Write + HalfClose> EchoConn<S> {
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
            buf: vec![0u8; buffer_size],
            stats: EchoStats::default(),
        }
    }

    /// Run operations until one would block or the connection finishes.
    ///
    /// Readiness is edge-triggered, so returning before `WouldBlock` would
    /// stall the connection.
    pub fn step(&mut self) -> io::Result<Progress> {
        loop {
            match self.state {
                ConnState::Reading => match self.stream.read(&mut self.buf) {
                    Ok(0) => {
                        self.stream.close_write()?;
                        self.state.half_close();
                        return Ok(Progress::Finished);
                    }
                    Ok(n) => {
                        trace!(bytes = n, "read");
                        self.stats.record(n);
                        self.state.start_echo(n);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Progress::Blocked)
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                },
                ConnState::Echoing { written, total } => {
                    match self.stream.write(&self.buf[written..total]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "write returned 0",
                            ));
                        }
                        Ok(n) => self.state.advance(n),
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Progress::Blocked)
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                ConnState::HalfClosed => return Ok(Progress::Finished),
            }
        }
    }
}
