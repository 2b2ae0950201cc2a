//! Retry with exponential backoff and jitter.
//!
//! Retryability is externalized: the policy carries a predicate over the
//! error, defaulting to the transient/permanent classification plus a
//! status-code allow-list. Backoff sleeps go through the injected clock.

use rand::Rng;
use resilience_core::{Clock, ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub multiplier: f64,
    /// Jitter fraction (0.0 - 1.0); each delay is scaled uniformly in
    /// `[1 - jitter, 1 + jitter]`
    pub jitter: f64,
    /// HTTP status codes retried in addition to transient classification
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
            retry_on_status: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Predicate deciding whether an error is worth retrying.
pub type RetryClassifier = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Retry policy: configuration plus an optional custom classifier.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Option<RetryClassifier>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("custom_classifier", &self.classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Create a policy with a custom attempt cap.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(RetryConfig {
            max_attempts,
            ..Default::default()
        })
    }

    /// Check whether an error is retryable under this policy.
    #[must_use]
    pub fn is_retryable(&self, error: &ResilienceError) -> bool {
        if let Some(classifier) = &self.classifier {
            return classifier(error);
        }
        if error.is_retryable() {
            return true;
        }
        matches!(error.status_code(), Some(code) if self.config.retry_on_status.contains(&code))
    }

    /// Delay before the attempt *after* `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.config.base_delay.as_millis() as f64;
        let delay = (base * self.config.multiplier.powi(exponent))
            .min(self.config.max_delay.as_millis() as f64);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };

        Duration::from_millis((delay * factor).max(0.0) as u64)
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Builder for retry policy
#[derive(Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
    classifier: Option<RetryClassifier>,
}

impl RetryPolicyBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total attempts, including the first.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Set base delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set max delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    /// Set jitter fraction.
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set status codes to retry on.
    #[must_use]
    pub fn retry_on_status(mut self, codes: Vec<u16>) -> Self {
        self.config.retry_on_status = codes;
        self
    }

    /// Replace the retryability predicate.
    #[must_use]
    pub fn classifier(
        mut self,
        classifier: impl Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            config: self.config,
            classifier: self.classifier,
        }
    }
}

/// Successful retry outcome with the attempt count, so callers can log or
/// alert on retry storms.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The value returned by the successful attempt
    pub value: T,
    /// Number of attempts made, including the first
    pub attempts: u32,
}

/// Drives an operation through a retry policy.
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    /// Create a new executor.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Execute an operation under the policy.
    ///
    /// Non-retryable errors propagate immediately with no delay. Once
    /// `max_attempts` is reached, the last error is wrapped as
    /// `RetryExhausted` carrying the attempt count.
    pub async fn run<F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        operation: F,
    ) -> ResilienceResult<RetryOutcome<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let max_attempts = policy.config().max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "retry succeeded");
                    }
                    return Ok(RetryOutcome { value, attempts: attempt });
                }
                Err(error) => {
                    if !policy.is_retryable(&error) {
                        return Err(error);
                    }
                    if attempt >= max_attempts {
                        return Err(ResilienceError::RetryExhausted {
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after error"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
