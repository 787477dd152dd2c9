//! Cancellation of blocked reservations.
//!
//! Rust threads cannot be interrupted from the outside, so a thread that may
//! need to abandon a blocking [`reserve`](crate::MemoryLimitController::reserve)
//! passes a [`CancellationToken`] to
//! [`reserve_interruptible`](crate::MemoryLimitController::reserve_interruptible)
//! instead. Any clone of the token can later cancel the wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Something a cancelled token must wake so its waiters recheck the flag.
pub(crate) trait Unpark: Send + Sync {
    /// Wake every thread parked on this object.
    ///
    /// Implementations must take the same lock the waiters check the
    /// cancellation flag under, so a cancel cannot slip between the check
    /// and the park.
    fn unpark_all(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    parked_on: Mutex<Vec<Weak<dyn Unpark>>>,
}

/// A cloneable handle that cancels interruptible reservations.
///
/// Cancellation is sticky: once cancelled, every later interruptible
/// reservation that would need to wait returns
/// [`LimitError::Cancelled`](memlimit_core::LimitError::Cancelled) instead.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parked_on: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel every reservation currently waiting on this token.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        // Snapshot first so no waiter lock is taken while holding ours.
        let targets: Vec<Arc<dyn Unpark>> = self
            .inner
            .parked_on
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();

        debug!(targets = targets.len(), "Cancellation requested");

        for target in targets {
            target.unpark_all();
        }
    }

    /// Register `target` to be woken on cancellation.
    ///
    /// Must be called before the waiter first checks [`is_cancelled`](Self::is_cancelled).
    pub(crate) fn register(&self, target: Weak<dyn Unpark>) {
        if self.is_cancelled() {
            return;
        }
        let mut parked_on = self.inner.parked_on.lock();
        parked_on.retain(|existing| existing.strong_count() > 0);
        if !parked_on.iter().any(|existing| existing.ptr_eq(&target)) {
            parked_on.push(target);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTarget {
        unparks: AtomicUsize,
    }

    impl Unpark for CountingTarget {
        fn unpark_all(&self) {
            self.unparks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn target() -> Arc<CountingTarget> {
        Arc::new(CountingTarget {
            unparks: AtomicUsize::new(0),
        })
    }

    fn as_weak(target: &Arc<CountingTarget>) -> Weak<dyn Unpark> {
        let strong: Arc<dyn Unpark> = target.clone();
        Arc::downgrade(&strong)
    }

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_unparks_registered_targets_once() {
        let token = CancellationToken::new();
        let t = target();
        token.register(as_weak(&t));
        token.register(as_weak(&t));

        token.cancel();
        token.cancel();

        assert_eq!(t.unparks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_after_cancel_is_not_retained() {
        let token = CancellationToken::new();
        token.cancel();

        let t = target();
        token.register(as_weak(&t));

        assert!(token.inner.parked_on.lock().is_empty());
        assert_eq!(t.unparks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_targets_are_skipped() {
        let token = CancellationToken::new();
        let t = target();
        token.register(as_weak(&t));
        drop(t);

        token.cancel();
        assert!(token.is_cancelled());
    }
}
