//! Test fixtures and a scriptable fake upstream

use futures::future::BoxFuture;
use resilience_core::{ResilienceError, ResilienceResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Request shape used across the integration tests
#[derive(Debug, Clone, Serialize)]
pub struct TestRequest {
    /// Target model name
    pub model: String,
    /// Prompt text
    pub prompt: String,
    /// Sampling temperature
    pub temperature: f32,
}

/// A default chat-style request
pub fn chat_request(prompt: &str) -> TestRequest {
    TestRequest {
        model: "gpt-4o-mini".to_string(),
        prompt: prompt.to_string(),
        temperature: 0.7,
    }
}

/// Scriptable fake upstream with a call counter.
pub struct FlakyUpstream {
    calls: AtomicU32,
    failures_before_success: u32,
    fail_after: Option<u32>,
    always_fail: bool,
    latency: Duration,
}

impl FlakyUpstream {
    /// An upstream that always succeeds.
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            fail_after: None,
            always_fail: false,
            latency: Duration::ZERO,
        })
    }

    /// An upstream that always fails with a retryable 503.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            fail_after: None,
            always_fail: true,
            latency: Duration::ZERO,
        })
    }

    /// An upstream that fails `n` times, then succeeds.
    pub fn fails_then_succeeds(n: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures_before_success: n,
            fail_after: None,
            always_fail: false,
            latency: Duration::ZERO,
        })
    }

    /// An upstream that succeeds `n` times, then fails from there on.
    pub fn succeeds_then_fails(n: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            fail_after: Some(n),
            always_fail: false,
            latency: Duration::ZERO,
        })
    }

    /// A succeeding upstream that takes `latency` per call, for tests that
    /// need a window to race concurrent callers.
    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            fail_after: None,
            always_fail: false,
            latency,
        })
    }

    /// Total calls observed so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn handle(&self, request: TestRequest) -> ResilienceResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted_failure = call < self.failures_before_success
            || self.fail_after.is_some_and(|n| call >= n);
        if self.always_fail || scripted_failure {
            return Err(ResilienceError::upstream(
                "service unavailable",
                Some(503),
                true,
            ));
        }
        Ok(format!("completion for: {}", request.prompt))
    }

    /// Invoke function suitable for `ResilientClientBuilder::build`.
    pub fn invoker(
        self: &Arc<Self>,
    ) -> impl Fn(TestRequest) -> BoxFuture<'static, ResilienceResult<String>> + Send + Sync + 'static
    {
        let upstream = Arc::clone(self);
        move |request| {
            let upstream = Arc::clone(&upstream);
            Box::pin(async move { upstream.handle(request).await })
        }
    }
}
