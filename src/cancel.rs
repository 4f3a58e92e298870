//! Cooperative cancellation (spec §5): a flag checked at every suspension
//! point (subprocess spawn, HTTP call, file write), not a hard interrupt.
//! An `Arc<AtomicBool>` carries the flag itself; a `tokio::sync::Notify`
//! lets an in-flight `tokio::select!` wake immediately instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::PipelineError;

#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    /// Requests cancellation and wakes every task currently awaiting
    /// [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns [`PipelineError::CancellationRequested`] if cancellation has
    /// already been requested; call this at every suspension point that
    /// isn't itself wrapped in a [`cancelled`](Self::cancelled) select arm.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::CancellationRequested)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Pair with `tokio::select!`
    /// around an in-flight subprocess or HTTP call to cut it short instead
    /// of waiting for it to finish on its own.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_observed_by_check() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(PipelineError::CancellationRequested)));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve immediately");
    }
}
