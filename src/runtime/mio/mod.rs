//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! Serves the same echo semantics as the tokio backend from one thread.

mod event_loop;

pub use event_loop::{EventLoop, ShutdownHandle};

use crate::config::Config;
use crate::error::ServerError;
use crate::runtime::{watch_signals, SignalOutcome, FORCED_EXIT_CODE};
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Run the server using the mio backend.
pub fn run(config: &Config, addr: SocketAddr) -> Result<(), ServerError> {
    let event_loop = EventLoop::bind(addr, config.buffer_size, config.grace_period)?;
    info!(address = %event_loop.local_addr(), "Server listening");

    let handle = event_loop.shutdown_handle();
    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || watch_ctrl_c(handle))?;

    event_loop.run()
}

/// Watch Ctrl-C from a helper thread: the first wakes the event loop for a
/// graceful shutdown, the second exits the process.
fn watch_ctrl_c(handle: ShutdownHandle) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Unable to listen for Ctrl-C");
            return;
        }
    };

    let wake = || {
        if let Err(e) = handle.shutdown() {
            warn!(error = %e, "Failed to wake event loop");
        }
    };
    let outcome = runtime.block_on(watch_signals(tokio::signal::ctrl_c, wake));
    if outcome == SignalOutcome::Forced {
        std::process::exit(FORCED_EXIT_CODE);
    }
}
