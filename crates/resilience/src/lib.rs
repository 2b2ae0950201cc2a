//! # Resilience
//!
//! Request-shaping middleware for outbound calls to an unreliable,
//! cost-metered, rate-limited backend:
//! - TTL response cache keyed by request fingerprint
//! - Token bucket rate limiting
//! - Idempotency tracking with in-flight coalescing
//! - Retry with exponential backoff and jitter
//! - Circuit breaker for cascading-failure protection
//!
//! [`ResilientClient`] composes all five around a caller-supplied `Invoke`
//! function, applying them in a fixed order per call.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod idempotency;
pub mod rate_limiter;
pub mod retry;

// Re-export main types
pub use resilience_core::{Clock, ManualClock, ResilienceError, ResilienceResult, SystemClock};

pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use client::{
    CallOptions, ClientSnapshot, InvokeFn, ResilientClient, ResilientClientBuilder,
    ResilientClientConfig,
};
pub use idempotency::{generate_bucketed_key, generate_key, IdempotencyConfig, IdempotencyTracker};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{RetryConfig, RetryExecutor, RetryOutcome, RetryPolicy, RetryPolicyBuilder};
