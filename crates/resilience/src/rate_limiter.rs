//! Token bucket admission control.
//!
//! Capacity refills continuously in proportion to elapsed time and each
//! admitted call consumes one whole token. The bucket never errors on its
//! own; callers either fast-fail on denial or block until a token arrives.

use parking_lot::Mutex;
use resilience_core::{Clock, ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound on a single blocking-wait sleep so a cancelled caller is
/// re-checked promptly and refill accounting stays current.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket capacity (maximum burst size). Must be positive; the limiter
    /// substitutes the default for non-positive values.
    pub max_tokens: f64,
    /// Tokens added per second. Must be positive; the limiter substitutes
    /// the default for non-positive values.
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter guarded by a single mutex.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new limiter with a full bucket.
    ///
    /// Non-positive capacity or refill rate is replaced by the default so a
    /// misconfigured limiter can never stall callers indefinitely.
    #[must_use]
    pub fn new(mut config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let defaults = RateLimiterConfig::default();
        if !config.max_tokens.is_finite() || config.max_tokens <= 0.0 {
            warn!(
                max_tokens = config.max_tokens,
                "invalid bucket capacity, using default"
            );
            config.max_tokens = defaults.max_tokens;
        }
        if !config.refill_rate.is_finite() || config.refill_rate <= 0.0 {
            warn!(
                refill_rate = config.refill_rate,
                "invalid refill rate, using default"
            );
            config.refill_rate = defaults.refill_rate;
        }
        let state = BucketState {
            tokens: config.max_tokens,
            last_refill: clock.now(),
        };
        Self {
            config,
            state: Mutex::new(state),
            clock,
        }
    }

    /// Refill in proportion to elapsed time, clamped to `[0, max_tokens]`.
    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens =
                (state.tokens + elapsed * self.config.refill_rate).clamp(0.0, self.config.max_tokens);
            state.last_refill = now;
        }
    }

    /// Take a token if one is available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            debug!(tokens_remaining = state.tokens, "rate limit token acquired");
            true
        } else {
            false
        }
    }

    /// Estimated time until the next token; zero if one is available now.
    pub fn wait_time(&self) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let millis = ((1.0 - state.tokens) / self.config.refill_rate * 1000.0).ceil();
        Duration::from_millis(millis as u64)
    }

    /// Await a token.
    ///
    /// Sleeps in bounded increments through the injected clock; dropping the
    /// future abandons the wait without consuming anything or corrupting
    /// bucket state.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self
                .wait_time()
                .min(MAX_SLEEP_SLICE)
                .max(Duration::from_millis(1));
            self.clock.sleep(wait).await;
        }
    }

    /// Await a token with a deadline.
    pub async fn acquire_timeout(&self, timeout: Duration) -> ResilienceResult<()> {
        tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "rate limit wait abandoned at deadline"
                );
                ResilienceError::Cancelled
            })
    }

    /// Read-only view of the bucket.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock();
        self.refill(&mut state);
        RateLimiterSnapshot {
            tokens: state.tokens,
            max_tokens: self.config.max_tokens,
            refill_rate: self.config.refill_rate,
        }
    }
}

/// Point-in-time view of the token bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSnapshot {
    /// Tokens currently available
    pub tokens: f64,
    /// Bucket capacity
    pub max_tokens: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl RateLimiterSnapshot {
    /// Consumed capacity as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_tokens <= 0.0 {
            0.0
        } else {
            ((self.max_tokens - self.tokens) / self.max_tokens * 100.0).max(0.0)
        }
    }
}
