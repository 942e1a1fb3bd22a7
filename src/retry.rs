//! Bounded retry for transient hardware faults.
//!
//! Step-motor controllers drop the occasional command on a busy serial bus,
//! so every motor call is wrapped in [`retry`]: up to `attempts` tries,
//! retrying immediately on failure. Two rules are absolute:
//!
//! - cancellation is never retried. The token is checked explicitly before
//!   every attempt, and an [`ObsError::Cancelled`] returned by the operation
//!   is rethrown as-is, bypassing the remaining budget;
//! - exhausting the budget re-raises the last captured error unchanged, so
//!   the run driver sees the real fault rather than a generic wrapper.

use crate::cancel::CancelToken;
use crate::error::{ObsError, ObsResult};
use std::future::Future;
use tracing::warn;

/// Run `operation` up to `attempts` times, returning the first success.
///
/// Attempts are immediate, with no backoff delay; a stalled controller either
/// answers the repeated command or the run fails fast. An `attempts` of zero
/// is treated as one.
///
/// # Errors
///
/// - [`ObsError::Cancelled`] as soon as the token is cancelled or the
///   operation reports cancellation, with no further attempts.
/// - The last captured error once the attempt budget is exhausted.
pub async fn retry<T, F, Fut>(attempts: u32, token: &CancelToken, mut operation: F) -> ObsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ObsResult<T>>,
{
    let budget = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=budget {
        token.ensure_active()?;

        match operation().await {
            Ok(value) => return Ok(value),
            // Cancellation can surface as an error from the callee as well as
            // through the token; neither form is ever retried.
            Err(ObsError::Cancelled) => return Err(ObsError::Cancelled),
            Err(err) => {
                if attempt < budget {
                    warn!(attempt, budget, error = %err, "device call failed, retrying");
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ObsError::Hardware("retry budget exhausted with no attempt".into())))
}
