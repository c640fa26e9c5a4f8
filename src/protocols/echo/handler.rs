//! Echo connection loop for the tokio reactor.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::net::EchoStream;

/// Totals for one finished connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoStats {
    /// Number of non-empty reads.
    pub reads: u64,
    /// Bytes read and written back.
    pub bytes: u64,
}

impl EchoStats {
    pub fn record(&mut self, n: usize) {
        self.reads += 1;
        self.bytes += n as u64;
    }
}

/// Echo everything read from `stream` back to it until end-of-stream.
///
/// Each iteration reads once, writes exactly the bytes read, and only then
/// reads again. A zero-length read closes the write half and ends the loop.
/// Any I/O error ends the loop and is returned to the caller; the stream is
/// dropped either way.
pub async fn run_echo<S: EchoStream>(mut stream: S, buffer_size: usize) -> io::Result<EchoStats> {
    let mut buffer = BytesMut::with_capacity(buffer_size);
    let mut stats = EchoStats::default();

    loop {
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            trace!("Peer closed its write half");
            stream.shutdown().await?;
            return Ok(stats);
        }

        trace!(bytes = n, "read");
        stats.record(n);

        stream.write_all(&buffer[..n]).await?;
        buffer.clear();
    }
}
