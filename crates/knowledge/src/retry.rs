//! Deadline-aware retry with exponential backoff.

use bastion_core::config::RetryConfig;
use bastion_core::{AppError, AppResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the sleep before attempt `attempt + 1`.
    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full jitter: uniform in `[0, ceiling]`.
    fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts or time.
    ///
    /// Only errors with [`AppError::is_retryable`] are retried, and never
    /// when the backoff would sleep past `deadline`.
    pub async fn run<T, F, Fut>(&self, stage: &str, deadline: Instant, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    let delay = self.delay(attempt);
                    if Instant::now() + delay >= deadline {
                        tracing::debug!("{}: no time left to retry after {}", stage, err.code());
                        return Err(err);
                    }
                    tracing::warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}",
                        stage,
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Bound `fut` by `budget` and by the overall `deadline`, whichever ends first.
pub async fn with_deadline<T, Fut>(stage: &str, budget: Duration, deadline: Instant, fut: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    let until = (Instant::now() + budget).min(deadline);
    match tokio::time::timeout_at(until, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(stage)),
    }
}
