//! Server error types.
//!
//! Only failures that end the service surface here. Connection-scoped I/O
//! errors stay inside their connection loop as plain `std::io::Error`.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Waiting for the next connection failed. The accept loop is not
    /// restarted after this.
    #[error("listener failed, no longer accepting connections: {0}")]
    Accept(#[source] io::Error),

    /// The reactor itself failed (runtime construction, polling).
    #[error("reactor error: {0}")]
    Io(#[from] io::Error),
}
