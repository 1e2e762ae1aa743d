//! Resilience patterns for the workflow dispatcher
//!
//! This module provides implementations of common resilience patterns:
//! - Retry with fixed or exponential backoff
//! - Circuit breaker
//! - Unified resilience facade

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitPermit};
pub use retry::{BackoffSchedule, RetryConfig, RetryExecutor};

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;

/// A unified resilience facade that composes retry and circuit breaking.
///
/// The breaker is consulted before every transport attempt, so a circuit
/// that opens mid-sequence stops the remaining retries. A circuit-open
/// rejection is not retryable and does not consume further attempts.
#[derive(Debug, Clone)]
pub struct Resilience {
    /// Retry executor
    retry: RetryExecutor,

    /// Circuit breaker, shared by every dispatch to the same endpoint
    circuit_breaker: Arc<CircuitBreaker>,
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(RetryConfig::default(), CircuitBreakerConfig::default())
    }
}

impl Resilience {
    /// Create a new resilience facade with specified configurations
    pub fn new(retry_config: RetryConfig, circuit_breaker_config: CircuitBreakerConfig) -> Self {
        Self::with_breaker(retry_config, Arc::new(CircuitBreaker::new(circuit_breaker_config)))
    }

    /// Create a facade around an existing circuit breaker
    pub fn with_breaker(retry_config: RetryConfig, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            retry: RetryExecutor::new(retry_config),
            circuit_breaker,
        }
    }

    /// Execute a fallible operation with all configured resilience patterns.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cb = &self.circuit_breaker;
        self.retry
            .execute(|attempt| {
                let acquired = cb.acquire().map(|permit| (permit, operation(attempt)));
                async move {
                    let (permit, call) = acquired?;

                    match call.await {
                        Ok(value) => {
                            permit.success();
                            Ok(value)
                        }
                        Err(err) => {
                            // a permanent failure means the endpoint answered
                            if err.is_retryable() {
                                permit.failure();
                            } else {
                                permit.success();
                            }
                            Err(err)
                        }
                    }
                }
            })
            .await
    }

    /// The shared circuit breaker
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Get the current status of the circuit breaker
    pub fn circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.circuit_breaker.status()
    }

    /// Reset the circuit breaker state
    pub fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset();
    }

    /// The retry configuration in use
    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.config()
    }

    /// Configure the retry executor
    pub fn configure_retry(&mut self, config: RetryConfig) {
        self.retry = RetryExecutor::new(config);
    }

    /// Configure the circuit breaker
    pub fn configure_circuit_breaker(&mut self, config: CircuitBreakerConfig) {
        self.circuit_breaker = Arc::new(CircuitBreaker::new(config));
    }
}

/// Status of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerStatus {
    /// Circuit is closed, allowing requests
    Closed,

    /// Circuit is open, rejecting requests
    Open,

    /// Circuit is half-open, allowing a single probe request
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}
