//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent: only the first cancellation reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns true if this call performed the cancellation.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.reason.write();
        if slot.is_some() {
            return false;
        }
        let reason = reason.into();
        tracing::info!(reason = %reason, "Cancellation requested");
        *slot = Some(reason);
        // Published after the reason, so an observer of the flag always finds it.
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(token.cancel("operator stop"));
        assert!(!token.cancel("second request"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("operator stop".to_string()));
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let token = Arc::new(CancellationToken::new());
        let remote = Arc::clone(&token);
        std::thread::spawn(move || {
            remote.cancel("from worker");
        })
        .join()
        .unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_reason_is_set_whenever_flag_is_observed() {
        for _ in 0..100 {
            let token = Arc::new(CancellationToken::new());
            let remote = Arc::clone(&token);
            let worker = std::thread::spawn(move || {
                remote.cancel("from worker");
            });
            while !token.is_cancelled() {
                std::hint::spin_loop();
            }
            assert_eq!(token.reason().as_deref(), Some("from worker"));
            worker.join().unwrap();
        }
    }
}
