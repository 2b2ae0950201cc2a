//! # Resilience Core
//!
//! Foundational types for the resilience middleware layer:
//! - Structured error taxonomy
//! - Injectable monotonic clock
//! - Canonical request fingerprinting

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod fingerprint;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ResilienceError, ResilienceResult};
pub use fingerprint::{compose_key, fingerprint};
