//! Stable request fingerprints.
//!
//! Cache keys and derived idempotency keys are SHA-256 digests over a
//! canonical JSON rendering of the request. `serde_json::Value` keeps map
//! keys ordered, so two semantically identical requests produce the same
//! digest regardless of field order at the call site, while any difference
//! in payload or sampling parameters produces a different one.

use crate::error::{ResilienceError, ResilienceResult};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Separator between hashed segments; never appears in JSON output or hex.
const SEGMENT_SEPARATOR: u8 = 0x1f;

/// Fingerprint a serializable value under a scope label.
///
/// The scope keeps digests from different subsystems (cache vs. idempotency)
/// from colliding even over identical payloads.
pub fn fingerprint<T>(scope: &str, value: &T) -> ResilienceResult<String>
where
    T: Serialize + ?Sized,
{
    let canonical = serde_json::to_value(value)
        .map_err(|e| ResilienceError::internal(format!("fingerprint serialization failed: {e}")))?;
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| ResilienceError::internal(format!("fingerprint serialization failed: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([SEGMENT_SEPARATOR]);
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Deterministic, collision-resistant key composed from string parts.
///
/// Parts are separated before hashing so `["ab", "c"]` and `["a", "bc"]`
/// yield different keys.
#[must_use]
pub fn compose_key(scope: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    for part in parts {
        hasher.update([SEGMENT_SEPARATOR]);
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
