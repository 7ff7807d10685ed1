//! Cancellation signal shared across the handoff pipeline.
//!
//! One signal propagates to every suspension point: the LLM calls, the retry
//! backoff sleeps, and the editor round-trip. Setting it is idempotent.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A settable "aborted" flag with wakeups for pending waiters.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Safe to call more than once.
    pub fn cancel(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once the signal fires; resolves immediately if it already has.
    pub async fn cancelled(&self) {
        // Register before re-checking so a cancel between the check and the
        // await cannot be missed.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sleep for `duration`, resolving early with [`Error::Aborted`] when the
/// signal fires.
pub async fn sleep_cancellable(duration: Duration, signal: &CancelSignal) -> Result<()> {
    if signal.is_cancelled() {
        return Err(Error::Aborted);
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = signal.cancelled() => Err(Error::Aborted),
    }
}
