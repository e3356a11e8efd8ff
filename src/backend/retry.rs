//! Bounded exponential backoff for retryable backend failures.

use std::time::Duration;
use tracing::{debug, warn};

use super::adapter::{AppliedState, ProvisioningBackend};
use crate::config::RetryConfig;
use crate::error::BackendError;
use crate::planner::Operation;

/// Retry policy for a single operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
        )
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
        }
    }

    /// Total attempts per operation, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Applies `operation`, retrying retryable failures until the attempts
    /// are used up. The last error is returned once they are.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the final attempt.
    pub async fn apply(
        &self,
        backend: &dyn ProvisioningBackend,
        operation: &Operation,
    ) -> Result<AppliedState, BackendError> {
        let mut attempt = 1;
        loop {
            match backend.apply(operation).await {
                Ok(applied) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation.description(), attempt);
                    }
                    return Ok(applied);
                }
                Err(err) if err.retryable && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {}ms",
                        operation.description(),
                        attempt,
                        self.max_attempts,
                        err.message,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
