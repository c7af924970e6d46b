//! Cooperative shutdown for the queue driver
//!
//! The owner signals via a shutdown token. The driver checks the token
//! between jobs; a job already processing runs to its terminal status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

/// A cooperative shutdown token.
///
/// Clones share state. Shutdown while a job is processing takes effect
/// once that job has finished.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Signal shutdown and wake every waiter.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            // Registered before the check so a concurrent shutdown is not missed
            let notified = self.inner.notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}
