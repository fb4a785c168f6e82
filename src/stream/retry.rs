use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::utils::errors::StreamError;

/// Bounded retry with exponential backoff for chunk fetches
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,
    /// Base delay for exponential backoff (first retry uses this delay)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Total number of attempts including the initial one
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Formula: min(base_delay * 2^attempt, max_delay)
    pub(crate) fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Execute an async operation, retrying errors that are retryable.
    ///
    /// Non-retryable errors are returned immediately. When every attempt
    /// fails, the last error is returned.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T, StreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, StreamError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_attempts {
            if attempt > 0 {
                debug!(
                    "{}: Retry attempt {} of {}",
                    operation_name, attempt, self.max_attempts
                );
            }

            match f(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("{}: Succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        debug!("{}: Not retrying: {}", operation_name, err);
                        return Err(err);
                    }

                    warn!("{}: Attempt {} failed: {}", operation_name, attempt + 1, err);
                    last_error = Some(err);

                    if attempt < self.max_attempts {
                        let delay = self.calculate_delay(attempt);
                        debug!(
                            "{}: Waiting {:?} before retry {} of {}",
                            operation_name,
                            delay,
                            attempt + 1,
                            self.max_attempts
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            StreamError::Transport(format!("{}: no attempt was made", operation_name))
        });
        warn!(
            "{}: All {} attempts failed, last error: {}",
            operation_name,
            self.total_attempts(),
            err
        );
        Err(err)
    }
}
