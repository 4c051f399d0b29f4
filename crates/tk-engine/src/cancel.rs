use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

// ---------------------------------------------------------------------------
// CancelToken — cooperative cancellation
// ---------------------------------------------------------------------------

/// Broadcast-based cancellation shared between the engine, its child tasks,
/// and the OS signal handler.
///
/// Long-running loops either `select!` on [`cancelled`] or poll
/// [`is_cancelled`] at iteration boundaries. The engine deliberately polls:
/// an in-flight agent iteration is allowed to finish before the run winds
/// down.
///
/// [`cancelled`]: CancelToken::cancelled
/// [`is_cancelled`]: CancelToken::is_cancelled
#[derive(Debug, Clone)]
pub struct CancelToken {
    trigger: broadcast::Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire the token. Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("cancellation requested");
            let _ = self.trigger.send(());
        }
    }

    /// Cheap non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolve when the token fires (immediately if it already has).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.trigger.subscribe();
        // A send between the check above and the subscribe is caught by the
        // re-check; recv covers everything after.
        if self.is_cancelled() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
