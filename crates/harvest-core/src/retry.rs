//! Exponential-backoff retry for fallible fetch operations.
//!
//! Cross-cutting policy, applied at the page-fetch call site. Only errors
//! classified retryable by [`AppError::is_retryable`] are retried; everything
//! else propagates immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_base: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 retries: 1s, 2s, 4s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_base: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed): `initial * base^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_base.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op`, retrying transient failures with backoff. On exhaustion the
    /// original error from the final attempt is propagated, not a wrapper.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = %delay.as_millis(),
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
