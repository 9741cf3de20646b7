//! Timeout-and-retry wrapper for external collaborator calls.
//!
//! Each attempt gets the same fixed deadline. A timed-out attempt is
//! retried exactly once; a second timeout, or any error the operation
//! itself returns, propagates.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

/// Failure of a call made through [`with_timeout_retry`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Both attempts exceeded the deadline.
    #[error("{operation} timed out after {attempts} attempts of {timeout:?}")]
    TimedOut {
        /// Label of the operation.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Deadline per attempt.
        timeout: Duration,
    },

    /// The operation returned an error.
    #[error(transparent)]
    Failed(E),
}

/// Attempts made before giving up on timeouts.
const MAX_ATTEMPTS: u32 = 2;

/// Run `call` with a per-attempt deadline, retrying once on timeout.
///
/// `call` is invoked again for the retry, so it must be safe to repeat.
pub async fn with_timeout_retry<T, E, F, Fut>(
    operation: &'static str,
    deadline: Duration,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    for attempt in 1..=MAX_ATTEMPTS {
        match timeout(deadline, call()).await {
            Ok(result) => return result.map_err(RetryError::Failed),
            Err(_elapsed) => {
                tracing::warn!(operation, attempt, ?deadline, "External call timed out");
            }
        }
    }
    Err(RetryError::TimedOut {
        operation,
        attempts: MAX_ATTEMPTS,
        timeout: deadline,
    })
}
