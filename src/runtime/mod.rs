//! Reactor backends.
//!
//! Both backends run everything on a single worker thread:
//! - `tokio`: current-thread runtime plus a `LocalSet`; connection loops are
//!   `spawn_local` tasks
//! - `mio`: hand-written readiness loop stepping per-connection state
//!   machines (epoll on Linux, kqueue on macOS)

mod connection;
mod mio;
mod shutdown;
mod tracker;

pub(crate) use connection::{EchoConn, HalfClose, Progress};
pub use shutdown::{watch_ctrl_c, watch_signals, Shutdown, SignalOutcome, FORCED_EXIT_CODE};
pub use tracker::ConnectionTracker;

use crate::config::{Config, RuntimeType};
use crate::error::ServerError;
use crate::net;
use crate::server::Server;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;
use tracing::info;

/// Single-worker cooperative scheduler.
///
/// Owns a current-thread tokio runtime and the `LocalSet` that connection
/// loops are spawned onto. Tasks still pending when the reactor is dropped
/// are cancelled, which drops their connections.
pub struct Reactor {
    // Dropped before the runtime so cancelled tasks release their sockets
    // while the I/O driver is still alive.
    tasks: LocalSet,
    runtime: Runtime,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            tasks: LocalSet::new(),
            runtime,
        })
    }

    /// Drive `future` to completion, running spawned local tasks alongside.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.tasks.block_on(&self.runtime, future)
    }
}

/// Run the server with the configured backend.
pub fn run(config: Config, addr: SocketAddr) -> Result<(), ServerError> {
    match config.runtime {
        RuntimeType::Tokio => run_tokio(&config, addr),
        RuntimeType::Mio => mio::run(&config, addr),
    }
}

fn run_tokio(config: &Config, addr: SocketAddr) -> Result<(), ServerError> {
    let reactor = Reactor::new()?;
    reactor.block_on(serve(config, addr))
}

async fn serve(config: &Config, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = net::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
    info!(address = %listener.local_addr()?, "Server listening");

    let shutdown = Shutdown::new();
    tokio::task::spawn_local(watch_ctrl_c(shutdown.clone()));

    Server::new(config, shutdown).run(listener).await
}
