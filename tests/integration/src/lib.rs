//! Integration tests for the resilience client
//!
//! End-to-end tests driving [`resilience::ResilientClient`] through a
//! scriptable fake upstream, covering:
//! - Caching and fingerprinting behavior
//! - Rate limiting (fast-fail and blocking)
//! - Idempotent coalescing and replay
//! - Retry and circuit breaker interplay

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;

#[cfg(test)]
mod breaker_tests;
#[cfg(test)]
mod coalescing_tests;
