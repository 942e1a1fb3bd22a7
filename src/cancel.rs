//! Cooperative cancellation for observation runs.
//!
//! One [`CancelSource`] is created per run by the `JobManager`; the matching
//! [`CancelToken`]s are threaded through `Job::initialize`, `Job::run` and
//! every device call. Cancellation is cooperative: callees check the token at
//! I/O boundaries and propagate [`ObsError::Cancelled`] unchanged.
//!
//! Built on a `tokio::sync::watch` channel so that any number of pending
//! operations can wait on the same signal without polling.

use crate::error::{ObsError, ObsResult};
use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Owning side of the cancellation signal. Held by the `JobManager` for the
/// duration of one run and dropped when the run finishes.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    /// Create a fresh, un-cancelled source.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Derive a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. Idempotent; wakes every pending
    /// [`CancelToken::cancelled`] wait.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the cancellation signal. Cheap to clone; every action and
/// device call receives one.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never be cancelled. Useful for one-shot tool
    /// invocations such as script validation.
    pub fn never() -> Self {
        static NEVER: Lazy<CancelSource> = Lazy::new(CancelSource::new);
        NEVER.token()
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Return `Err(ObsError::Cancelled)` if cancellation was requested.
    ///
    /// Called at the top of every action and before every retry attempt.
    pub fn ensure_active(&self) -> ObsResult<()> {
        if self.is_cancelled() {
            Err(ObsError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is requested.
    ///
    /// A dropped [`CancelSource`] counts as cancellation: an orphaned run must
    /// not keep driving hardware.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for errors only when the sender is gone.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
