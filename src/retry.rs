//! Bounded fixed-interval polling and retry.
//!
//! Used for every wait on the stack backend. Each attempt either finishes
//! the wait, asks for another round, or fails. Failures that classify
//! themselves as transient use up an attempt and the loop continues; any
//! other failure ends the loop at once. The interval is constant so
//! progress output keeps a steady cadence.
//!
//! # Example
//!
//! ```ignore
//! use kubestack::retry::{poll_until, PollPolicy, Progress};
//!
//! let state = poll_until(&policy, "wait_create", &cancel, |_attempt| async {
//!     let state = backend.describe_stack("demo").await?;
//!     Ok(if state.status.is_terminal() { Progress::Done(state) } else { Progress::Waiting })
//! })
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Errors that know whether trying again may help
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Attempt budget and cadence for a wait loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Upper bound on the time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(180, Duration::from_secs(10))
    }
}

/// Outcome of a single successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    Done(T),
    Waiting,
}

/// Why a wait loop stopped without a result
#[derive(Debug)]
pub enum RetryError<E> {
    /// The attempt budget ran out; `last_error` is set when the final
    /// attempt failed transiently rather than reporting progress
    Exhausted { attempts: u32, last_error: Option<E> },
    /// An attempt failed with an error that is not worth retrying
    Fatal(E),
    /// The cancellation token fired
    Cancelled { attempts: u32 },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                last_error: Some(e),
            } => write!(f, "gave up after {} attempts (last error: {})", attempts, e),
            RetryError::Exhausted { attempts, .. } => {
                write!(f, "gave up after {} attempts", attempts)
            }
            RetryError::Fatal(e) => write!(f, "{}", e),
            RetryError::Cancelled { attempts } => {
                write!(f, "cancelled after {} attempts", attempts)
            }
        }
    }
}

/// Run `step` until it reports [`Progress::Done`], fails fatally, the
/// budget is exhausted or `cancel` fires.
///
/// `step` receives the 1-based attempt number.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    operation: &str,
    cancel: &CancellationToken,
    mut step: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Progress<T>, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt - 1,
            });
        }

        match step(attempt).await {
            Ok(Progress::Done(value)) => return Ok(value),
            Ok(Progress::Waiting) => {
                debug!(operation = %operation, attempt, max_attempts, "Still waiting");
                last_error = None;
            }
            Err(e) if e.is_transient() => {
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient failure, retrying"
                );
                last_error = Some(e);
            }
            Err(e) => {
                error!(operation = %operation, attempt, error = %e, "Operation failed");
                return Err(RetryError::Fatal(e));
            }
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }

    error!(operation = %operation, attempts = max_attempts, "Attempt budget exhausted");
    Err(RetryError::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}

/// Retry a single call while it fails transiently.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &PollPolicy,
    operation: &str,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    poll_until(policy, operation, cancel, |_| {
        let fut = call();
        async move { fut.await.map(Progress::Done) }
    })
    .await
}
