//! echo-reactor: a single-worker asynchronous TCP echo server
//!
//! Every byte a client sends is written back unchanged. When the client
//! half-closes, the server finishes echoing and half-closes in turn.
//!
//! Features:
//! - One cooperative worker: tokio current-thread reactor or a mio event loop
//! - One detached connection loop per client, isolated from the others
//! - Graceful shutdown on Ctrl-C with a bounded drain period
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod net;
mod protocols;
mod runtime;
mod server;

#[cfg(test)]
mod testing;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;
    let addr = config.listen_addr()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        buffer_size = config.buffer_size,
        grace_period = ?config.grace_period,
        "Starting echo-reactor server"
    );

    runtime::run(config, addr)?;
    Ok(())
}
