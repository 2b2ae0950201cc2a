//! Test helper utilities for integration tests

use once_cell::sync::Lazy;
use resilience::RetryPolicy;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A retry policy that never retries, for tests counting upstream calls.
pub fn single_attempt_policy() -> RetryPolicy {
    RetryPolicy::with_max_attempts(1)
}
