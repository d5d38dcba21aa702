//! Exponential backoff with jitter
//!
//! Backoff schedule for the default ceiling of 5 attempts: 1s, 2s, 4s, 8s
//! between attempts, each plus up to 100ms of random jitter. There is no
//! sleep after the final failed attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

/// Default number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Base delay, doubled after every failed attempt.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Exclusive upper bound of the random jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(100);

/// Returned when every attempt failed.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("operation failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: anyhow::Error,
    },
}

/// Bounded retry policy.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl Backoff {
    /// A policy with `max_attempts` attempts in total (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (0-based): `2^attempt`
    /// seconds plus jitter in `[0, 100ms)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
        base_delay(attempt) + Duration::from_millis(jitter_ms)
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    pub async fn retry<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 >= self.max_attempts => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %err,
                        "Operation failed, no attempts left"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: self.max_attempts,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn base_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor)
}
