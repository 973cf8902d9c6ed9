//! Bounded retry with exponential backoff.
//!
//! Any fallible async operation can be wrapped; only errors for which
//! [`CorpusBuilderError::is_retryable`] holds are retried.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use corpusbuilder_shared::{AppConfig, CorpusBuilderError};

/// Upper bound for a single backoff sleep, including host-requested delays.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How many times to try, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Never less than 1.
    pub attempts: u32,
    /// Delay after the first failure; doubled after each subsequent one.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn delay_for(&self, failed: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

/// The last error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure {
    pub last_error: CorpusBuilderError,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Returns the value together with the number of attempts it took. Stops early
/// with [`CorpusBuilderError::Cancelled`] when `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = corpusbuilder_shared::Result<T>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure {
                last_error: CorpusBuilderError::Cancelled,
                attempts: attempt,
            });
        }

        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.attempts {
            return Err(RetryFailure {
                last_error: err,
                attempts: attempt,
            });
        }

        let delay = err
            .retry_after()
            .map_or(policy.delay_for(attempt), |hint| {
                hint.max(policy.delay_for(attempt))
            })
            .min(MAX_BACKOFF);

        if matches!(err, CorpusBuilderError::RateLimited { .. }) {
            warn!(label, attempt, delay_ms = delay.as_millis(), "rate limited, backing off");
        } else {
            debug!(label, attempt, delay_ms = delay.as_millis(), error = %err, "retrying");
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryFailure {
                    last_error: CorpusBuilderError::Cancelled,
                    attempts: attempt,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
