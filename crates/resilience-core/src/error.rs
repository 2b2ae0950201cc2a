//! Error taxonomy for the resilience layer.
//!
//! Every failure mode a caller can observe is a structured variant carrying
//! the fields needed to decide between retry-after-backoff, display-and-abort,
//! or escalate. Errors are `Clone` so coalesced idempotent callers can all
//! receive the terminal outcome of a single shared execution.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the resilience layer.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors produced by the resilience layer or surfaced from upstream.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// Upstream call failed (transport or HTTP-level).
    #[error("upstream error: {message}")]
    Upstream {
        /// Human-readable failure description
        message: String,
        /// HTTP status code, if the failure carried one
        status_code: Option<u16>,
        /// Whether the upstream classified the failure as transient
        retryable: bool,
    },

    /// Token bucket had no capacity and the caller chose not to block.
    #[error("rate limited, next token in {wait_time:?}")]
    RateLimited {
        /// Estimated time until the next token is available
        wait_time: Duration,
    },

    /// Circuit breaker is open; upstream was not called.
    #[error("circuit open, probing resumes in {retry_after:?}")]
    CircuitOpen {
        /// Time remaining until the breaker will probe recovery
        retry_after: Duration,
    },

    /// All retry attempts were consumed.
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Number of attempts made, including the first
        attempts: u32,
        /// The error returned by the final attempt
        #[source]
        source: Box<ResilienceError>,
    },

    /// The caller's cancellation or deadline fired at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal bookkeeping failure (serialization, abandoned execution).
    #[error("internal error: {message}")]
    Internal {
        /// Failure description
        message: String,
    },
}

impl ResilienceError {
    /// Upstream failure with explicit classification.
    pub fn upstream(
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Upstream {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Transport-level failure (connection reset, DNS, read timeout).
    /// Always retryable.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status_code: None,
            retryable: true,
        }
    }

    /// Request validation failure. Never retryable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status_code: Some(400),
            retryable: false,
        }
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status associated with the error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status_code, .. } => *status_code,
            Self::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Default transient/permanent classification.
    ///
    /// Upstream failures marked retryable, 429s, and 5xx-class responses are
    /// transient. Everything the layer itself fast-fails (`RateLimited`,
    /// `CircuitOpen`, `Cancelled`, `RetryExhausted`) is terminal for the call
    /// that received it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream {
                retryable,
                status_code,
                ..
            } => {
                *retryable
                    || matches!(status_code, Some(code) if *code == 429 || *code >= 500)
            }
            _ => false,
        }
    }
}
