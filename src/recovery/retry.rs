use super::{CircuitBreaker, ErrorCategory, classify};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget plus the delay schedule between attempts.
///
/// `delays[i]` is slept before attempt `i + 1`; attempts past the end of the
/// schedule reuse its last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_schedule(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    /// Doubling delays starting at `base` and capped at `cap`; the first
    /// attempt runs immediately.
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        let mut delays = Vec::with_capacity(max_attempts as usize);
        delays.push(Duration::ZERO);
        let mut next = base;
        for _ in 1..max_attempts {
            delays.push(next.min(cap));
            next = next.saturating_mul(2);
        }
        Self {
            max_attempts,
            delays,
        }
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Successful result plus the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last_error:#}")]
    Exhausted {
        attempts: u32,
        category: ErrorCategory,
        last_error: anyhow::Error,
    },

    #[error("{category} failure on attempt {attempts}: {last_error:#}")]
    NonRetryable {
        attempts: u32,
        category: ErrorCategory,
        last_error: anyhow::Error,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Exhausted { category, .. } | Self::NonRetryable { category, .. } => {
                Some(*category)
            }
            Self::Cancelled { .. } => None,
        }
    }

    pub fn last_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Exhausted { last_error, .. } | Self::NonRetryable { last_error, .. } => {
                Some(last_error)
            }
            Self::Cancelled { .. } => None,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times.
///
/// Only `transient` failures are retried. When a breaker is supplied every
/// attempt is gated by it; a rejection counts as a transient attempt without
/// invoking `op`. Backoff sleeps end early when `cancel` fires.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    breaker: Option<&CircuitBreaker>,
    mut op: F,
) -> Result<RetryOutcome<T>, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt - 1 });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let result = match breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(()) => {
                    let result = op(attempt).await;
                    match &result {
                        Ok(_) => breaker.record_success(),
                        // The integration answered; the fault is in the request.
                        Err(err)
                            if matches!(
                                classify(err),
                                ErrorCategory::Logic | ErrorCategory::Data
                            ) =>
                        {
                            breaker.record_success();
                        }
                        Err(_) => breaker.record_failure(),
                    }
                    result
                }
                Err(open) => Err(anyhow::Error::new(open)),
            },
            None => op(attempt).await,
        };

        let err = match result {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) => err,
        };

        let category = classify(&err);
        if !category.is_retryable() {
            return Err(RetryError::NonRetryable {
                attempts: attempt,
                category,
                last_error: err,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                category,
                last_error: err,
            });
        }

        tracing::warn!(
            attempt,
            max_attempts,
            next_delay_secs = policy.delay_before(attempt + 1).as_secs(),
            error = %format!("{err:#}"),
            "attempt failed, retrying"
        );

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
    }
}
