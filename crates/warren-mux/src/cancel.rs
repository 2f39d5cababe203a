use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Idempotent cancellation flag shared by a reader thread, its forwarder and
/// whoever stops them.
///
/// Moves `not-started -> running -> cancelled`; cancelling is allowed from
/// either earlier state and happens at most once.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(NOT_STARTED),
                notify: Notify::new(),
            }),
        }
    }

    /// Mark the guarded work as started. No effect once cancelled.
    pub fn mark_running(&self) {
        let _ = self.inner.state.compare_exchange(
            NOT_STARTED,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Cancel. Returns `true` only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        let previous = self.inner.state.swap(CANCELLED, Ordering::AcqRel);
        if previous == CANCELLED {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_transitions() {
        let token = CancelToken::new();
        assert!(!token.is_running());
        token.mark_running();
        assert!(token.is_running());
        assert!(token.cancel());
        assert!(token.is_cancelled());
        // A cancelled token never goes back to running.
        token.mark_running();
        assert!(!token.is_running());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.cancel());
        assert!(!clone.cancel());
        assert!(!token.cancel());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
