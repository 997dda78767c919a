use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Process-wide shutdown coordinator.
///
/// Cloned into every long-running component. `trigger()` flips a watch
/// channel, so a component that subscribes *after* the trigger still observes
/// it. Components hold a [`ShutdownGuard`] while they drain; the composition
/// root waits for all guards with [`ShutdownSignal::wait_for_drain`].
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
/// let mut stop = shutdown.clone();
///
/// tokio::select! {
///     _ = stop.wait() => { /* cleanup */ }
///     _ = do_work() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered_tx: Arc<watch::Sender<bool>>,
    triggered_rx: watch::Receiver<bool>,
    guards_tx: Arc<watch::Sender<usize>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (triggered_tx, triggered_rx) = watch::channel(false);
        let (guards_tx, _) = watch::channel(0usize);
        Self {
            triggered_tx: Arc::new(triggered_tx),
            triggered_rx,
            guards_tx: Arc::new(guards_tx),
        }
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        *self.triggered_rx.borrow()
    }

    /// Trigger shutdown. Repeated calls are no-ops.
    pub fn trigger(&self) {
        let first = self.triggered_tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
        if first {
            info!("shutdown signal triggered");
        } else {
            warn!("shutdown already triggered");
        }
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&mut self) {
        // The sender lives as long as any clone of the signal, including self.
        let _ = self.triggered_rx.wait_for(|fired| *fired).await;
    }

    /// Register a component that must finish draining before exit.
    pub fn guard(&self) -> ShutdownGuard {
        self.guards_tx.send_modify(|n| *n += 1);
        ShutdownGuard {
            guards_tx: self.guards_tx.clone(),
        }
    }

    /// Number of guards that have not been dropped yet.
    pub fn outstanding(&self) -> usize {
        *self.guards_tx.borrow()
    }

    /// Wait until every outstanding guard is dropped, or the timeout expires.
    pub async fn wait_for_drain(&self, timeout: Duration) -> DrainResult {
        let mut rx = self.guards_tx.subscribe();
        let drained = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .is_ok_and(|r| r.is_ok());
        if drained {
            info!("all components drained");
            return DrainResult::Complete;
        }
        let pending = *rx.borrow();
        warn!(pending, "drain timeout, some components did not finish");
        DrainResult::Timeout { pending }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DrainResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// Every guard was released.
    Complete,
    /// Timeout expired with `pending` guards still held.
    Timeout { pending: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete)
    }
}

// ---------------------------------------------------------------------------
// ShutdownGuard
// ---------------------------------------------------------------------------

/// Held by a draining component; releases its slot on drop.
#[derive(Debug)]
pub struct ShutdownGuard {
    guards_tx: Arc<watch::Sender<usize>>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.guards_tx.send_modify(|n| *n = n.saturating_sub(1));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
