//! Idempotent coalescing behavior through the composed client

use crate::fixtures::*;
use crate::helpers::*;
use pretty_assertions::assert_eq;
use resilience::{generate_key, CallOptions, ResilientClient, ResilientClientBuilder};
use std::sync::Arc;
use std::time::Duration;

fn client(upstream: &Arc<FlakyUpstream>) -> Arc<ResilientClient<TestRequest, String>> {
    Arc::new(ResilientClientBuilder::new().build(upstream.invoker()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_with_the_same_key_share_one_call() {
    init_tracing();
    let upstream = FlakyUpstream::slow(Duration::from_millis(50));
    let client = client(&upstream);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .call(
                    chat_request("hello"),
                    CallOptions::new().with_idempotency_key("req-1"),
                )
                .await
        }));
    }

    for handle in handles {
        let response = handle.await.expect("join").expect("shared response");
        assert_eq!(response, "completion for: hello");
    }
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn completed_key_replays_even_for_a_different_request() {
    init_tracing();
    let upstream = FlakyUpstream::succeeding();
    let client = client(&upstream);

    let first = client
        .call(
            chat_request("hello"),
            CallOptions::new().with_idempotency_key("req-1"),
        )
        .await
        .expect("first");
    let replayed = client
        .call(
            chat_request("something else entirely"),
            CallOptions::new().with_idempotency_key("req-1"),
        )
        .await
        .expect("replayed");

    assert_eq!(first, replayed);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_execution_populates_the_cache() {
    init_tracing();
    let upstream = FlakyUpstream::slow(Duration::from_millis(20));
    let client = client(&upstream);

    client
        .call(
            chat_request("hello"),
            CallOptions::new()
                .with_cache_ttl(Duration::from_secs(60))
                .with_idempotency_key("req-1"),
        )
        .await
        .expect("coalesced call");

    // Same request without a key is served from the cache written inside
    // the coalesced execution
    client
        .call(
            chat_request("hello"),
            CallOptions::new().with_cache_ttl(Duration::from_secs(60)),
        )
        .await
        .expect("cached call");

    assert_eq!(upstream.calls(), 1);
    assert_eq!(client.snapshot().cache.hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_caller_does_not_cancel_the_shared_call() {
    init_tracing();
    let upstream = FlakyUpstream::slow(Duration::from_millis(50));
    let client = client(&upstream);

    let initiator = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .call(
                    chat_request("hello"),
                    CallOptions::new().with_idempotency_key("req-1"),
                )
                .await
        })
    };

    // Let the initiator start the upstream call, then abandon it
    tokio::time::sleep(Duration::from_millis(10)).await;
    initiator.abort();

    let response = client
        .call(
            chat_request("hello"),
            CallOptions::new().with_idempotency_key("req-1"),
        )
        .await
        .expect("joined result");
    assert_eq!(response, "completion for: hello");
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn generated_keys_deduplicate_across_submissions() {
    init_tracing();
    let upstream = FlakyUpstream::succeeding();
    let client = client(&upstream);

    for _ in 0..3 {
        let key = generate_key("chat", &["tenant-1", "request-42"]);
        client
            .call(
                chat_request("hello"),
                CallOptions::new().with_idempotency_key(key),
            )
            .await
            .expect("response");
    }
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn distinct_keys_do_not_coalesce() {
    init_tracing();
    let upstream = FlakyUpstream::succeeding();
    let client = client(&upstream);

    for key in ["req-1", "req-2", "req-3"] {
        client
            .call(
                chat_request("hello"),
                CallOptions::new().with_idempotency_key(key),
            )
            .await
            .expect("response");
    }
    assert_eq!(upstream.calls(), 3);
}
