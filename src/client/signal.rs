use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    aborted: AtomicBool,
    notify: Notify,
}

/// Create a connected handle/signal pair.
///
/// The handle side cancels; the signal side travels inside a call context
/// and is observed by middleware and transports.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let shared = Arc::new(Shared::default());
    (
        AbortHandle {
            shared: shared.clone(),
        },
        AbortSignal { shared },
    )
}

/// Caller-held handle that cancels an in-flight call
#[derive(Debug, Clone)]
pub struct AbortHandle {
    shared: Arc<Shared>,
}

impl AbortHandle {
    /// Cancel the call; idempotent
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Check if the call was cancelled
    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }
}

/// Cancellation signal observed by the call pipeline
#[derive(Debug, Clone)]
pub struct AbortSignal {
    shared: Arc<Shared>,
}

impl AbortSignal {
    /// Check if the call was cancelled
    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once the call is cancelled; never resolves otherwise
    pub async fn cancelled(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let notified = self.shared.notify.notified();
            // flag may have flipped between the check and registration
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}
