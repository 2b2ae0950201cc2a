//! Client facade composing the full resilience pipeline.
//!
//! Per call the layers apply in a fixed order: cache lookup, rate limiting,
//! idempotency coalescing, then circuit breaker wrapping the retry loop
//! around the caller-supplied invoke function. A cache hit returns before
//! the limiter or breaker are consulted, and the cache write happens inside
//! the coalesced execution so joined callers observe it.

use crate::{
    CacheConfig, CacheStats, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
    IdempotencyConfig, IdempotencyTracker, RateLimiter, RateLimiterConfig, RateLimiterSnapshot,
    ResponseCache, RetryConfig, RetryExecutor, RetryPolicy,
};
use futures::future::BoxFuture;
use resilience_core::{fingerprint, Clock, ResilienceError, ResilienceResult, SystemClock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Boxed upstream invoke function.
pub type InvokeFn<Req, Resp> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, ResilienceResult<Resp>> + Send + Sync>;

/// Aggregate configuration for every layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilientClientConfig {
    /// Response cache settings
    pub cache: CacheConfig,
    /// Token bucket settings
    pub rate_limiter: RateLimiterConfig,
    /// Idempotency retention settings
    pub idempotency: IdempotencyConfig,
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Default retry settings
    pub retry: RetryConfig,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cache the response under the request fingerprint for this long.
    /// `None` (or a zero duration) disables caching for the call.
    pub cache_ttl: Option<Duration>,
    /// Coalesce and deduplicate under this key
    pub idempotency_key: Option<String>,
    /// Override the client's default retry policy
    pub retry_policy: Option<RetryPolicy>,
    /// Block for a token instead of fast-failing when the bucket is empty
    pub rate_limit_blocking: bool,
}

impl CallOptions {
    /// Options with every layer at its default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the response for `ttl`.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Deduplicate under `key`.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Use `policy` instead of the client default for this call.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Wait for a rate limit token instead of failing fast.
    #[must_use]
    pub fn blocking_rate_limit(mut self) -> Self {
        self.rate_limit_blocking = true;
        self
    }
}

/// Client wrapping an upstream invoke function with caching, rate limiting,
/// idempotency, retries, and a circuit breaker.
pub struct ResilientClient<Req, Resp> {
    invoke: InvokeFn<Req, Resp>,
    cache: Arc<ResponseCache<Resp>>,
    rate_limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyTracker<Resp>>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryExecutor>,
    default_retry_policy: RetryPolicy,
}

impl<Req, Resp> ResilientClient<Req, Resp>
where
    Req: Serialize + Clone + Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    /// Create a client with the given configuration and the system clock.
    pub fn new<F, Fut>(config: ResilientClientConfig, invoke: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<Resp>> + Send + 'static,
    {
        ResilientClientBuilder::new().config(config).build(invoke)
    }

    /// Issue a call through the pipeline.
    pub async fn call(&self, request: Req, options: CallOptions) -> ResilienceResult<Resp> {
        let cache_slot = match options.cache_ttl.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => Some((fingerprint("response-cache", &request)?, ttl)),
            None => None,
        };

        if let Some((key, _)) = &cache_slot {
            if let Some(response) = self.cache.get(key) {
                debug!("cache hit, bypassing limiter and breaker");
                return Ok(response);
            }
        }

        if options.rate_limit_blocking {
            self.rate_limiter.acquire().await;
        } else if !self.rate_limiter.try_acquire() {
            return Err(ResilienceError::RateLimited {
                wait_time: self.rate_limiter.wait_time(),
            });
        }

        let policy = options
            .retry_policy
            .unwrap_or_else(|| self.default_retry_policy.clone());
        let work = Self::upstream_work(
            Arc::clone(&self.circuit_breaker),
            Arc::clone(&self.retry),
            policy,
            Arc::clone(&self.invoke),
            Arc::clone(&self.cache),
            cache_slot,
            request,
        );

        match options.idempotency_key.filter(|key| !key.is_empty()) {
            Some(key) => self.idempotency.execute(&key, move || work).await,
            None => work.await,
        }
    }

    /// The breaker gates the whole retry run: one admission check and one
    /// recorded outcome per logical call, however many attempts it takes.
    fn upstream_work(
        circuit_breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryExecutor>,
        policy: RetryPolicy,
        invoke: InvokeFn<Req, Resp>,
        cache: Arc<ResponseCache<Resp>>,
        cache_slot: Option<(String, Duration)>,
        request: Req,
    ) -> BoxFuture<'static, ResilienceResult<Resp>> {
        Box::pin(async move {
            let outcome = circuit_breaker
                .execute(|| retry.run(&policy, || (invoke)(request.clone())))
                .await?;
            if outcome.attempts > 1 {
                debug!(attempts = outcome.attempts, "call succeeded after retries");
            }
            let response = outcome.value;
            if let Some((key, ttl)) = cache_slot {
                cache.set(key, response.clone(), ttl);
            }
            Ok(response)
        })
    }

    /// Point-in-time view across every layer.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            cache: self.cache.stats(),
            rate_limiter: self.rate_limiter.snapshot(),
            circuit_breaker: self.circuit_breaker.snapshot(),
            pending_idempotency_keys: self.idempotency.pending_count(),
        }
    }

    /// Force the circuit breaker closed, for operator intervention.
    pub fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset();
    }
}

/// Point-in-time view across the client's layers.
#[derive(Debug, Clone, Copy)]
pub struct ClientSnapshot {
    /// Cache statistics
    pub cache: CacheStats,
    /// Token bucket state
    pub rate_limiter: RateLimiterSnapshot,
    /// Breaker state and counters
    pub circuit_breaker: CircuitBreakerSnapshot,
    /// Keys with an execution currently in flight
    pub pending_idempotency_keys: usize,
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder {
    config: ResilientClientConfig,
    clock: Arc<dyn Clock>,
    retry_policy: Option<RetryPolicy>,
}

impl Default for ResilientClientBuilder {
    fn default() -> Self {
        Self {
            config: ResilientClientConfig::default(),
            clock: Arc::new(SystemClock),
            retry_policy: None,
        }
    }
}

impl ResilientClientBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ResilientClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set cache configuration.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Set rate limiter configuration.
    #[must_use]
    pub fn rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.config.rate_limiter = rate_limiter;
        self
    }

    /// Set idempotency configuration.
    #[must_use]
    pub fn idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
        self.config.idempotency = idempotency;
        self
    }

    /// Set circuit breaker configuration.
    #[must_use]
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = circuit_breaker;
        self
    }

    /// Set default retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the default retry policy, overriding the retry configuration.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Inject a clock, for deterministic tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the client around an upstream invoke function.
    pub fn build<Req, Resp, F, Fut>(self, invoke: F) -> ResilientClient<Req, Resp>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: Clone + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<Resp>> + Send + 'static,
    {
        let default_retry_policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::new(self.config.retry.clone()));

        ResilientClient {
            invoke: Arc::new(move |request| Box::pin(invoke(request))),
            cache: Arc::new(ResponseCache::new(
                self.config.cache,
                Arc::clone(&self.clock),
            )),
            rate_limiter: Arc::new(RateLimiter::new(
                self.config.rate_limiter,
                Arc::clone(&self.clock),
            )),
            idempotency: Arc::new(IdempotencyTracker::new(
                self.config.idempotency,
                Arc::clone(&self.clock),
            )),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                self.config.circuit_breaker,
                Arc::clone(&self.clock),
            )),
            retry: Arc::new(RetryExecutor::new(Arc::clone(&self.clock))),
            default_retry_policy,
        }
    }
}
