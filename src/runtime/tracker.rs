//! Live-connection accounting for draining at shutdown.
//!
//! Connection loops hold no reference to each other or to a registry; each
//! one only carries a `ConnectionGuard` whose drop marks it finished.
//! Everything runs on the reactor thread, so plain `Rc`/`Cell` suffice.

use std::cell::Cell;
use std::rc::Rc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    active: Cell<usize>,
    idle: Notify,
}

/// Counts connection loops that have not finished yet.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Rc<Inner>,
}

/// Held by one connection loop for as long as it runs.
pub struct ConnectionGuard {
    inner: Rc<Inner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection loop.
    pub fn register(&self) -> ConnectionGuard {
        self.inner.active.set(self.inner.active.get() + 1);
        ConnectionGuard {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Number of connection loops still running.
    pub fn active(&self) -> usize {
        self.inner.active.get()
    }

    /// Resolve once no connection loops are running.
    pub async fn wait_idle(&self) {
        // No other task runs between the check and the await, so a
        // notification cannot slip in unobserved.
        while self.active() > 0 {
            self.inner.idle.notified().await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.inner.active.get() - 1;
        self.inner.active.set(remaining);
        if remaining == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}
