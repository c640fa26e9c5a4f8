//! Shutdown signalling shared by both reactor backends.

use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cloneable, level-triggered shutdown flag.
///
/// Once triggered it stays triggered, so late waiters resolve immediately.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Exit status used when a second Ctrl-C cuts the drain short.
pub const FORCED_EXIT_CODE: i32 = 130;

/// How signal watching ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// A second signal arrived while draining.
    Forced,
    /// Signals could not be received.
    Unavailable,
}

/// Call `on_first` on the first signal, then resolve on the second.
///
/// `next_signal` resolves each time a signal is delivered.
pub async fn watch_signals<F, Fut>(mut next_signal: F, on_first: impl FnOnce()) -> SignalOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        return SignalOutcome::Unavailable;
    }
    info!("Received Ctrl-C, shutting down (press again to exit immediately)");
    on_first();

    if let Err(e) = next_signal().await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        return SignalOutcome::Unavailable;
    }
    warn!("Received second Ctrl-C, exiting immediately");
    SignalOutcome::Forced
}

/// Trigger `shutdown` on Ctrl-C; exit the process on a second Ctrl-C.
pub async fn watch_ctrl_c(shutdown: Shutdown) {
    let outcome = watch_signals(tokio::signal::ctrl_c, || shutdown.trigger()).await;
    if outcome == SignalOutcome::Forced {
        std::process::exit(FORCED_EXIT_CODE);
    }
}
