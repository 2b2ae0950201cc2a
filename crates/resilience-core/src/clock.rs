//! Injectable monotonic time source.
//!
//! Every component that reads time or sleeps does so through [`Clock`], which
//! keeps state machines deterministic under test. Production code uses
//! [`SystemClock`]; tests either pause the tokio timer or drive a
//! [`ManualClock`] explicitly.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
///
/// Deterministic under `tokio::time::pause` in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually advanced clock for deterministic tests.
///
/// `sleep` suspends until [`ManualClock::advance`] moves the clock past the
/// deadline; no timer thread is involved.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    advanced: Notify,
}

impl ManualClock {
    /// Create a clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            advanced: Notify::new(),
        }
    }

    /// Move the clock forward and wake any sleepers whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
        self.advanced.notify_waiters();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        loop {
            // Register for the wakeup before re-checking the deadline so an
            // advance between the check and the await is not lost.
            let notified = self.advanced.notified();
            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}
