//! Bounded retries with a fixed delay.

use crate::MechInteractResult;
use mech_config::MechInteractConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry mechanism for transient failures of local steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy making at most `max_attempts` attempts.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy from `retry_attempts` and `request_retry_delay`.
    pub fn from_config(config: &MechInteractConfig) -> Self {
        Self::new(config.retry_attempts, config.request_retry_delay())
    }

    /// Maximum attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `f` until it succeeds or the attempts are used up, returning the last error.
    pub async fn retry<F, Fut, T>(&self, what: &str, mut f: F) -> MechInteractResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MechInteractResult<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempts >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        step = what,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Step failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
