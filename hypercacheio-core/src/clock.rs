//! Wall-clock abstraction.
//!
//! Every expiration decision reads "now" through a [`Clock`] so that expiry,
//! lease stealing and sweeping can be driven deterministically in tests.
//! Times are whole epoch seconds, matching the persisted layout.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in epoch seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time as seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The node's wall clock. No distributed clock sync is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
