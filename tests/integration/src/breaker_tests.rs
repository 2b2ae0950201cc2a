//! Circuit breaker behavior through the composed client

use crate::fixtures::*;
use crate::helpers::*;
use pretty_assertions::assert_eq;
use resilience::{
    CallOptions, CircuitBreakerConfig, CircuitState, ResilienceError, ResilientClient,
    ResilientClientBuilder,
};
use std::sync::Arc;
use std::time::Duration;

fn breaker_client(
    upstream: &Arc<FlakyUpstream>,
    config: CircuitBreakerConfig,
) -> ResilientClient<TestRequest, String> {
    ResilientClientBuilder::new()
        .circuit_breaker(config)
        .retry_policy(single_attempt_policy())
        .build(upstream.invoker())
}

#[tokio::test]
async fn breaker_opens_after_consecutive_failures() {
    init_tracing();
    let upstream = FlakyUpstream::failing();
    let client = breaker_client(
        &upstream,
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
    );

    for _ in 0..2 {
        let result = client.call(chat_request("hello"), CallOptions::new()).await;
        assert!(matches!(result, Err(ResilienceError::Upstream { .. })));
    }

    let result = client.call(chat_request("hello"), CallOptions::new()).await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    // The rejected call never reached the upstream
    assert_eq!(upstream.calls(), 2);
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_recovers_through_half_open_probes() {
    init_tracing();
    let upstream = FlakyUpstream::fails_then_succeeds(1);
    let client = breaker_client(
        &upstream,
        CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(100),
        },
    );

    let result = client.call(chat_request("hello"), CallOptions::new()).await;
    assert!(result.is_err());
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Open);

    let result = client.call(chat_request("hello"), CallOptions::new()).await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));

    tokio::time::sleep(Duration::from_millis(100)).await;

    client
        .call(chat_request("hello"), CallOptions::new())
        .await
        .expect("first probe");
    assert_eq!(
        client.snapshot().circuit_breaker.state,
        CircuitState::HalfOpen
    );

    client
        .call(chat_request("hello"), CallOptions::new())
        .await
        .expect("second probe");
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_run_counts_once_against_the_breaker() {
    init_tracing();
    let upstream = FlakyUpstream::failing();
    let client: ResilientClient<TestRequest, String> = ResilientClientBuilder::new()
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        })
        .build(upstream.invoker());

    // Two logical calls, three attempts each
    for _ in 0..2 {
        let result = client.call(chat_request("hello"), CallOptions::new()).await;
        assert!(matches!(
            result,
            Err(ResilienceError::RetryExhausted { .. })
        ));
    }
    assert_eq!(upstream.calls(), 6);
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Open);

    let result = client.call(chat_request("hello"), CallOptions::new()).await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(upstream.calls(), 6);
}

#[tokio::test]
async fn manual_reset_closes_the_circuit() {
    init_tracing();
    let upstream = FlakyUpstream::failing();
    let client = breaker_client(
        &upstream,
        CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
    );

    let _ = client.call(chat_request("hello"), CallOptions::new()).await;
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Open);

    client.reset_circuit_breaker();
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Closed);

    // Closed again: the next call reaches the upstream
    let _ = client.call(chat_request("hello"), CallOptions::new()).await;
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn cached_responses_remain_available_while_the_circuit_is_open() {
    init_tracing();
    let upstream = FlakyUpstream::succeeds_then_fails(1);
    let client = breaker_client(
        &upstream,
        CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
    );
    let options = CallOptions::new().with_cache_ttl(Duration::from_secs(60));

    client
        .call(chat_request("hello"), options.clone())
        .await
        .expect("warm the cache");

    // Trip the breaker with a different, uncached request
    let result = client.call(chat_request("other"), CallOptions::new()).await;
    assert!(result.is_err());
    assert_eq!(client.snapshot().circuit_breaker.state, CircuitState::Open);

    let response = client
        .call(chat_request("hello"), options)
        .await
        .expect("cached response despite open circuit");
    assert_eq!(response, "completion for: hello");
    assert_eq!(upstream.calls(), 2);

    let result = client.call(chat_request("fresh"), CallOptions::new()).await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
}
