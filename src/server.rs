//! TCP echo server for the tokio reactor.
//!
//! Runs the accept loop, detaches one echo task per connection, and drains
//! open connections when accepting stops.

use crate::config::Config;
use crate::error::ServerError;
use crate::net::Listener;
use crate::protocols::echo::run_echo;
use crate::runtime::{ConnectionTracker, Shutdown};
use std::time::Duration;
use tracing::{debug, debug_span, error, info, warn, Instrument};

/// Server instance
pub struct Server {
    buffer_size: usize,
    grace_period: Duration,
    shutdown: Shutdown,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config, shutdown: Shutdown) -> Self {
        Server {
            buffer_size: config.buffer_size,
            grace_period: config.grace_period,
            shutdown,
        }
    }

    /// Accept connections until shutdown or listener failure, then drain.
    ///
    /// Must run inside a `LocalSet`: connection loops are spawned with
    /// `spawn_local`. A listener failure is logged and returned after the
    /// connections that were already open have finished.
    pub async fn run<L: Listener>(&self, listener: L) -> Result<(), ServerError> {
        let tracker = ConnectionTracker::new();

        let result = run_accept_loop(listener, &tracker, self.buffer_size, &self.shutdown).await;
        match &result {
            Ok(()) => info!("Stopped accepting connections"),
            Err(e) => error!(error = %e, "Accept loop terminated"),
        }

        self.drain(&tracker).await;
        result
    }

    /// Wait for live connections. Unbounded until shutdown is requested,
    /// then bounded by the grace period.
    async fn drain(&self, tracker: &ConnectionTracker) {
        if tracker.active() == 0 {
            return;
        }
        info!(active = tracker.active(), "Waiting for open connections to close");

        let idle = tracker.wait_idle();
        tokio::pin!(idle);

        tokio::select! {
            _ = &mut idle => return,
            _ = self.shutdown.wait() => {}
        }

        if tokio::time::timeout(self.grace_period, idle).await.is_err() {
            warn!(
                remaining = tracker.active(),
                grace_period = ?self.grace_period,
                "Grace period elapsed, dropping open connections"
            );
        }
    }
}

/// Accept connections and detach an echo task for each one.
///
/// Returns `Ok(())` when shutdown is requested and `ServerError::Accept`
/// when the listener fails. Either way the listener is dropped on return.
pub async fn run_accept_loop<L: Listener>(
    mut listener: L,
    tracker: &ConnectionTracker,
    buffer_size: usize,
    shutdown: &Shutdown,
) -> Result<(), ServerError> {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = accepted.map_err(ServerError::Accept)?;

        let guard = tracker.register();
        debug!(peer = %peer, active = tracker.active(), "New connection");

        tokio::task::spawn_local(
            async move {
                match run_echo(stream, buffer_size).await {
                    Ok(stats) => {
                        debug!(reads = stats.reads, bytes = stats.bytes, "Connection closed")
                    }
                    Err(e) => debug!(error = %e, "Connection error"),
                }
                drop(guard);
            }
            .instrument(debug_span!("conn", peer = %peer)),
        );
    }
}
