//! Circuit breaker for cascading-failure protection.
//!
//! Closed admits everything and counts consecutive failures. Open rejects
//! immediately until the reset timeout elapses, at which point the next check
//! moves the breaker to half-open. Half-open admits probes; enough
//! consecutive successes close the circuit, any failure reopens it.
//! Transitions are evaluated lazily at call time, there is no background
//! timer.

use parking_lot::Mutex;
use resilience_core::{Clock, ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests flow through
    Closed,
    /// Requests are rejected without reaching the upstream
    Open,
    /// Limited probe traffic is admitted to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting probes
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarded by a single mutex.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            clock,
        }
    }

    /// Admission check. Returns `CircuitOpen` with the remaining cooldown
    /// when the circuit is open, otherwise lets the call proceed.
    pub fn check(&self) -> ResilienceResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::ZERO, |at| self.clock.now().duration_since(at));
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    info!("circuit breaker transitioning to half-open");
                    Ok(())
                } else {
                    let retry_after = self.config.reset_timeout - elapsed;
                    debug!(
                        retry_after_ms = retry_after.as_millis() as u64,
                        "circuit breaker rejecting request"
                    );
                    Err(ResilienceError::CircuitOpen { retry_after })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    info!("circuit breaker closed after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.consecutive_successes = 0;
                warn!("circuit breaker reopened by half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Run an operation through the breaker: admission check, then the
    /// outcome is recorded as one success or one failure.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.check()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Force the breaker back to closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        info!("circuit breaker reset");
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Point-in-time view of the breaker.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
        }
    }
}

/// Point-in-time view of the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures observed while closed
    pub consecutive_failures: u32,
    /// Consecutive successes observed while half-open
    pub consecutive_successes: u32,
    /// When the circuit last opened
    pub opened_at: Option<Instant>,
}
