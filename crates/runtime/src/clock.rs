//! Millisecond clocks for the timer set
//!
//! The timer set reads time through the [`Clock`] trait so hosts can drive it
//! from the real monotonic clock and tests can step time by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of monotonic milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the first reading, backed by `hrtime()`
#[derive(Debug)]
pub struct MonotonicClock {
    base_ns: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            base_ns: tessel_core::hrtime(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        tessel_core::hrtime().saturating_sub(self.base_ns) / 1_000_000
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Jump to an absolute time. Time never moves backwards.
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::AcqRel);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
