//! Bounded retry execution with backoff.
//!
//! [`execute_with_retry`] drives an operation through up to `max_attempts`
//! attempts, sleeping per the [`BackoffPolicy`] between failures. Exhaustion
//! and shutdown are reported as distinct [`RetryError`] variants so callers
//! can tell "kept failing" from "gave up because we are stopping".

use std::future::Future;

use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

use crate::retry::BackoffPolicy;
use crate::shutdown::ShutdownListener;

/// Terminal outcome of a retried operation that never succeeded.
#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; `error` is the error from the last attempt.
    #[error("operation failed after {attempts} attempts: {error}")]
    Exhausted { error: E, attempts: u32 },

    /// Shutdown fired while waiting to retry. `attempts` counts the
    /// attempts actually made before the wait was interrupted.
    #[error("operation cancelled by shutdown after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Runs `operation` until it succeeds, exhausts `max_attempts`, or shutdown
/// interrupts a backoff wait.
///
/// Attempts are numbered from 1. A success returns immediately with no
/// further delay; a failure on the final attempt yields that attempt's
/// error. Delays are computed only between attempts, never after the last.
/// `max_attempts` of 0 is treated as 1 (single try, no retry).
pub async fn execute_with_retry<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    policy: &BackoffPolicy,
    shutdown: &ShutdownListener,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let span = tracing::info_span!(
            "retry_attempt",
            attempt,
            max_attempts,
            outcome = tracing::field::Empty,
            delay_ms = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        match operation().instrument(span.clone()).await {
            Ok(value) => {
                span.record("outcome", "success");
                debug!(attempt, "operation succeeded");
                return Ok(value);
            }
            Err(err) => {
                span.record("outcome", "failure");
                span.record("error", tracing::field::display(&err));
                warn!(attempt, max_attempts, error = %err, "operation attempt failed");

                if attempt >= max_attempts {
                    error!(max_attempts, "operation failed on final attempt");
                    return Err(RetryError::Exhausted {
                        error: err,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay(attempt);
                span.record("delay_ms", delay.as_millis() as u64);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");

                if !shutdown.sleep(delay).await {
                    info!(attempt, "retry wait interrupted by shutdown");
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }

        attempt += 1;
    }
}
