//! Circuit breaker implementation for the workflow engine endpoint
//!
//! Fails fast while the remote engine is down and lets a single probe
//! through once the cooldown has elapsed.
//!
//! ```text
//!   CLOSED ──(failures >= threshold)──▶ OPEN
//!     ▲                                  │
//!     │ probe ok                         │ cooldown elapsed
//!     │                                  ▼
//!     └────────────── HALF_OPEN ◀────────┘
//!                         │ probe failed
//!                         └──────────────▶ OPEN
//! ```
//!
//! Every read and transition happens under one mutex, so concurrent callers
//! never both win the half-open probe slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::CircuitBreakerStatus;
use crate::error::{Result, WorkflowError};

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens
    pub failure_threshold: usize,

    /// Time the circuit stays open before a probe is allowed
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitBreakerStatus,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A thread-safe circuit breaker guarding one remote endpoint
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,

    /// Total number of recorded failures
    total_failures: AtomicUsize,

    /// Total number of recorded successes
    total_successes: AtomicUsize,

    /// Total number of calls rejected while open
    total_rejections: AtomicUsize,

    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the specified configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                status: CircuitBreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            total_failures: AtomicUsize::new(0),
            total_successes: AtomicUsize::new(0),
            total_rejections: AtomicUsize::new(0),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // a panic while holding the lock cannot leave the state half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask for permission to make one transport attempt.
    ///
    /// The returned permit must be resolved with [`CircuitPermit::success`]
    /// or [`CircuitPermit::failure`]; dropping it unresolved counts as a
    /// failure when it was the half-open probe.
    pub fn acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut state = self.lock();

        match state.status {
            CircuitBreakerStatus::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitBreakerStatus::Open => {
                let elapsed = state.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.cooldown => {
                        drop(state);
                        self.total_rejections.fetch_add(1, Ordering::Relaxed);
                        Err(WorkflowError::circuit_open(format!(
                            "Circuit breaker is open, rejecting requests for {}ms more",
                            (self.config.cooldown - elapsed).as_millis()
                        )))
                    }
                    _ => {
                        info!("Circuit breaker transitioning to HalfOpen state");
                        state.status = CircuitBreakerStatus::HalfOpen;
                        state.probe_in_flight = true;
                        Ok(CircuitPermit::new(self, true))
                    }
                }
            }
            CircuitBreakerStatus::HalfOpen => {
                if state.probe_in_flight {
                    drop(state);
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    Err(WorkflowError::circuit_open(
                        "Circuit breaker is half-open and its probe is in flight",
                    ))
                } else {
                    state.probe_in_flight = true;
                    Ok(CircuitPermit::new(self, true))
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.settle(true, None);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.settle(false, None);
    }

    /// Apply a call outcome. `probe` is `Some` when the outcome comes from a
    /// permit; outcomes of permits issued before the circuit opened do not
    /// settle the half-open probe.
    fn settle(&self, success: bool, probe: Option<bool>) {
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut state = self.lock();

        match (state.status, success) {
            (CircuitBreakerStatus::Closed, true) => {
                state.consecutive_failures = 0;
            }
            (CircuitBreakerStatus::Closed, false) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning to Open state"
                    );
                    state.status = CircuitBreakerStatus::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            (CircuitBreakerStatus::HalfOpen, _) if probe == Some(false) => {
                debug!("Ignoring stale outcome while half-open probe is in flight");
            }
            (CircuitBreakerStatus::HalfOpen, true) => {
                info!("Circuit breaker probe succeeded, transitioning to Closed state");
                state.status = CircuitBreakerStatus::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
            }
            (CircuitBreakerStatus::HalfOpen, false) => {
                warn!("Circuit breaker probe failed, reopening");
                state.consecutive_failures += 1;
                state.status = CircuitBreakerStatus::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
            }
            (CircuitBreakerStatus::Open, _) => {
                debug!(success, "Received outcome in Open state, ignoring");
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        state.status = CircuitBreakerStatus::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    /// Get the current circuit status
    pub fn status(&self) -> CircuitBreakerStatus {
        self.lock().status
    }

    /// Get the current number of consecutive failures
    pub fn failure_count(&self) -> usize {
        self.lock().consecutive_failures
    }

    /// Get the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get metrics about the circuit breaker
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.lock();

        CircuitBreakerMetrics {
            status: state.status,
            failure_count: state.consecutive_failures,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            opened_duration: state.opened_at.map(|at| at.elapsed()),
            config: self.config.clone(),
        }
    }
}

/// Permission to make a single call through the breaker
#[derive(Debug)]
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    /// Whether this permit is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The call succeeded
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.settle(true, Some(self.probe));
    }

    /// The call failed
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.settle(false, Some(self.probe));
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            debug!("Half-open probe abandoned, treating as failure");
            self.breaker.settle(false, Some(true));
        }
    }
}

/// Metrics for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// Current status
    pub status: CircuitBreakerStatus,

    /// Current consecutive failure count
    pub failure_count: usize,

    /// Total failures seen
    pub total_failures: usize,

    /// Total successes seen
    pub total_successes: usize,

    /// Total calls rejected without a transport attempt
    pub total_rejections: usize,

    /// Time since the circuit last opened, if it is open or probing
    pub opened_duration: Option<Duration>,

    /// Current configuration
    pub config: CircuitBreakerConfig,
}
