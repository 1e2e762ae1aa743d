//! Retry with configurable backoff for recoverable errors
//!
//! This module provides a retry mechanism with a fixed or exponential
//! backoff schedule for handling transient failures when dispatching to
//! the workflow engine.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::{Result, WorkflowError};

/// Delay schedule applied between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffSchedule {
    /// Wait the same interval before every retry
    Fixed(Duration),

    /// Grow the interval by `multiplier` after each retry, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        BackoffSchedule::Exponential {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffSchedule {
    /// Build a fresh backoff iterator for one dispatch
    fn start(&self) -> Box<dyn Backoff + Send> {
        match *self {
            BackoffSchedule::Fixed(interval) => Box::new(Constant::new(interval)),
            BackoffSchedule::Exponential {
                initial,
                max,
                multiplier,
            } => Box::new(ExponentialBackoff {
                current_interval: initial,
                initial_interval: initial,
                max_interval: max,
                multiplier,
                randomization_factor: 0.0,
                // attempts are bounded by max_attempts, not by elapsed time
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            }),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of transport attempts, including the first (minimum 1)
    pub max_attempts: u32,

    /// Delay schedule between attempts
    pub backoff: BackoffSchedule,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffSchedule::default(),
        }
    }
}

impl RetryConfig {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffSchedule::Fixed(Duration::ZERO),
        }
    }

    /// A policy with a fixed delay between attempts
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffSchedule::Fixed(interval),
        }
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig {{ max_attempts: {}, backoff: {:?} }}",
            self.max_attempts, self.backoff
        )
    }
}

/// Executor for retry operations
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    /// Retry configuration
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the specified configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute a fallible operation with retries according to the configuration.
    ///
    /// The operation receives the 1-based attempt number. Attempts run
    /// strictly one after another. A non-retryable error is returned
    /// immediately; after the last attempt the last error is returned with
    /// an `attempts` context value.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.backoff.start();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err) && attempt < max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(Duration::ZERO);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Dispatch attempt failed with retryable error, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(attempt, retryable = err.is_retryable(), "Giving up after attempt");
                    return Err(err.with_context_value("attempts", attempt));
                }
            }
        }
    }

    /// Determine if an error should be retried
    fn should_retry(&self, error: &WorkflowError) -> bool {
        error.is_retryable()
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Update the retry configuration
    pub fn update_config(&mut self, config: RetryConfig) {
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::fixed(max_attempts, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let retry = RetryExecutor::new(RetryConfig::default());
        let result = retry.execute(|_| async { Ok::<_, WorkflowError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_on_failure() {
        let attempts = AtomicU32::new(0);
        let retry = RetryExecutor::new(fast_config(3));

        let result = retry
            .execute(|_| {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current < 2 {
                        Err(WorkflowError::network("Test failure"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_non_retryable_error() {
        let attempts = AtomicU32::new(0);
        let retry = RetryExecutor::new(fast_config(5));

        let result: Result<()> = retry
            .execute(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkflowError::http(422, "Invalid input")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_exhausted() {
        let attempts = AtomicU32::new(0);
        let retry = RetryExecutor::new(fast_config(3));

        let result: Result<()> = retry
            .execute(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkflowError::http(503, "Persistent failure")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(err.context_value("attempts"), Some("3"));
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_tries_once() {
        let attempts = AtomicU32::new(0);
        let retry = RetryExecutor::new(fast_config(0));

        let _: Result<()> = retry
            .execute(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkflowError::network("down")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exponential_schedule_grows() {
        let schedule = BackoffSchedule::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            multiplier: 2.0,
        };
        let mut backoff = schedule.start();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(350)));
    }
}
