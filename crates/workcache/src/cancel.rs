//! Cancellation capabilities.
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Something that can be cooperatively asked to stop.
///
/// Implementations must be idempotent: cancelling an already cancelled or already finished
/// target has no effect.
pub trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<T: Send + 'static> Cancel for JoinHandle<T> {
    fn cancel(&self) {
        self.abort();
    }
}

impl Cancel for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }
}

/// Owns a cancellation target and cancels it exactly once.
///
/// The target is cancelled either by an explicit call to [`cancel`](Self::cancel) or when the
/// handle is dropped, whichever comes first. Use [`detach`](Self::detach) to release the target
/// without cancelling it.
///
/// Cancelling only needs a shared reference, so a handle can be shared between several owners,
/// for example behind an [`Arc`](std::sync::Arc). The target is still cancelled only once.
pub struct CancellableHandle {
    target: Mutex<Option<Box<dyn Cancel>>>,
}

impl CancellableHandle {
    pub fn new<C: Cancel + 'static>(target: C) -> Self {
        Self {
            target: Mutex::new(Some(Box::new(target))),
        }
    }

    fn take(&self) -> Option<Box<dyn Cancel>> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Cancels the wrapped target, unless that already happened.
    pub fn cancel(&self) {
        // The target is cancelled outside of the lock, it may run arbitrary hooks.
        if let Some(target) = self.take() {
            target.cancel();
        }
    }

    /// Whether this handle still holds a target that it will cancel.
    pub fn is_armed(&self) -> bool {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the target without cancelling it.
    pub fn detach(self) {
        drop(self.take());
    }
}

impl Cancel for CancellableHandle {
    fn cancel(&self) {
        CancellableHandle::cancel(self);
    }
}

impl Drop for CancellableHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancellableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableHandle")
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone, Default)]
    struct CountingTarget(Arc<AtomicUsize>);

    impl Cancel for CountingTarget {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_exactly_once() {
        let target = CountingTarget::default();
        let handle = CancellableHandle::new(target.clone());
        assert!(handle.is_armed());

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_armed());
        drop(handle);

        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_on_drop() {
        let target = CountingTarget::default();
        drop(CancellableHandle::new(target.clone()));
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        let target = CountingTarget::default();
        CancellableHandle::new(target.clone()).detach();
        assert_eq!(target.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shared_between_owners() {
        let target = CountingTarget::default();
        let handle = Arc::new(CancellableHandle::new(target.clone()));

        let other = Arc::clone(&handle);
        std::thread::spawn(move || other.cancel()).join().unwrap();
        handle.cancel();
        drop(handle);

        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_handles() {
        let target = CountingTarget::default();
        let outer = CancellableHandle::new(CancellableHandle::new(target.clone()));
        outer.cancel();
        drop(outer);

        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        drop(CancellableHandle::new(token.clone()));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_join_handle_aborted() {
        let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _sender = sender;
            futures::future::pending::<()>().await
        });
        drop(CancellableHandle::new(task));

        // the aborted task drops its future, and with it the sender
        assert!(receiver.await.is_err());
    }
}
