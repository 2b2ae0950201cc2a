//! TTL response cache.
//!
//! Maps a request fingerprint to a previously computed response. An entry is
//! visible only while `now < created_at + ttl`; expired entries are logically
//! absent even before they are physically evicted, and a lookup never returns
//! one.

use parking_lot::Mutex;
use resilience_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before lowest-hit eviction kicks in
    pub max_entries: usize,
    /// TTL applied when the caller does not supply one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
    hits: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    hits: u64,
    misses: u64,
}

/// TTL-keyed response cache guarded by a single mutex.
///
/// Values are copied in on `set` and copied out on `get`; the cache owns its
/// copy and callers cannot mutate a stored entry in place.
pub struct ResponseCache<T> {
    inner: Mutex<CacheInner<T>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ResponseCache<T> {
    /// Create a new cache.
    #[must_use]
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            config,
            clock,
        }
    }

    /// Look up a value. Expired entries are evicted and reported as misses.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = matches!(inner.entries.get(key), Some(entry) if entry.is_expired(now));
        if expired {
            inner.entries.remove(key);
        }

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.hits += 1;
            let value = entry.value.clone();
            inner.hits += 1;
            return Some(value);
        }

        inner.misses += 1;
        None
    }

    /// Store a value, unconditionally replacing any existing entry for `key`.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) {
            Self::evict_for_insert(&mut inner, now, self.config.max_entries);
        }

        debug!(ttl_ms = ttl.as_millis() as u64, "response cached");
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl,
                hits: 0,
            },
        );
    }

    /// Store with the configured default TTL.
    pub fn set_default(&self, key: impl Into<String>, value: T) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Remove a single entry.
    pub fn evict(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Count of entries that have not expired, evicting the rest.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        inner.entries.len()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Drop expired entries, then lowest-hit entries until one slot is free.
    fn evict_for_insert(inner: &mut CacheInner<T>, now: Instant, max_entries: usize) {
        inner.entries.retain(|_, entry| !entry.is_expired(now));

        if inner.entries.len() >= max_entries {
            let to_remove = inner.entries.len() - max_entries + 1;
            let mut hit_counts: Vec<(String, u64)> = inner
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.hits))
                .collect();
            hit_counts.sort_by_key(|(_, hits)| *hits);

            for (key, _) in hit_counts.into_iter().take(to_remove) {
                inner.entries.remove(&key);
            }
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses (including expired entries)
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
