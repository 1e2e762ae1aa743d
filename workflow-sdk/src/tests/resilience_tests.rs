//! Tests for resilience patterns
//!
//! These tests verify that retry and circuit breaking compose correctly
//! in the resilience facade.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;

    use crate::error::{ErrorKind, Result, WorkflowError};
    use crate::resilience::{
        BackoffSchedule, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, Resilience, RetryConfig,
    };

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let resilience = Resilience::new(fast_retry(3), CircuitBreakerConfig::default());
        let attempts = AtomicU32::new(0);

        let result = resilience
            .execute(|attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(WorkflowError::network("Temporary failure"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // success resets the consecutive failure counter
        assert_eq!(resilience.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_trip_breaker() {
        let resilience = Resilience::new(
            fast_retry(3),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );

        let result: Result<()> = resilience
            .execute(|_| async { Err(WorkflowError::http(400, "bad payload")) })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Http);
        assert_eq!(resilience.circuit_breaker_status(), CircuitBreakerStatus::Closed);
    }

    #[tokio::test]
    async fn test_breaker_checked_before_every_attempt() {
        let resilience = Resilience::new(
            fast_retry(10),
            CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(60),
            },
        );
        let attempts = AtomicU32::new(0);

        let result: Result<()> = resilience
            .execute(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkflowError::http(502, "bad gateway")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(err.context_value("attempts"), Some("4"));
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_running_operation() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        }));
        breaker.record_failure();

        let resilience = Resilience::with_breaker(fast_retry(3), Arc::clone(&breaker));
        let attempts = AtomicU32::new(0);

        let result: Result<()> = resilience
            .execute(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::CircuitOpen);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_shared_breaker() {
        let resilience = Resilience::new(
            RetryConfig::no_retry(),
            CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(60),
            },
        );

        let outcomes: Vec<Result<()>> = join_all(
            (0..10).map(|_| resilience.execute(|_| async { Err(WorkflowError::timeout("no answer")) })),
        )
        .await;

        assert!(outcomes.iter().all(|outcome| outcome.is_err()));
        assert_eq!(resilience.circuit_breaker_status(), CircuitBreakerStatus::Open);

        let metrics = resilience.circuit_breaker().metrics();
        assert_eq!(metrics.total_failures + metrics.total_rejections, 10);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let resilience = Resilience::new(
            RetryConfig::no_retry(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
        );

        let _: Result<()> = resilience
            .execute(|_| async { Err(WorkflowError::network("down")) })
            .await;
        assert_eq!(resilience.circuit_breaker_status(), CircuitBreakerStatus::Open);

        resilience.reset_circuit_breaker();

        assert_eq!(resilience.circuit_breaker_status(), CircuitBreakerStatus::Closed);
        assert!(resilience.execute(|_| async { Ok(1) }).await.is_ok());
    }

    #[test]
    fn test_configure_retry() {
        let mut resilience = Resilience::default();
        assert_eq!(resilience.retry_config().max_attempts, 3);

        resilience.configure_retry(RetryConfig {
            max_attempts: 6,
            backoff: BackoffSchedule::Fixed(Duration::from_millis(5)),
        });

        assert_eq!(resilience.retry_config().max_attempts, 6);
        assert!(!resilience.retry_config().to_string().is_empty());
    }
}
