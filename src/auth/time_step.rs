//! Discrete time buckets for OTP windowing.
//!
//! Wall-clock time is quantized into fixed 60 second buckets. A bucket is
//! identified by the epoch-millisecond value at its start.

use std::sync::atomic::{AtomicI64, Ordering};

/// Length of one bucket in milliseconds.
pub const INTERVAL_MS: i64 = 60 * 1000;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Start of a time bucket, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket(i64);

impl TimeBucket {
    /// Bucket containing `now_millis`, shifted by `offset` whole buckets.
    pub fn at(now_millis: i64, offset: i64) -> Self {
        let start = now_millis.div_euclid(INTERVAL_MS) * INTERVAL_MS;
        Self(start + offset * INTERVAL_MS)
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + INTERVAL_MS)
    }
}

/// Returns the current bucket shifted by `offset` buckets (may be negative).
pub fn current_bucket(clock: &dyn Clock, offset: i64) -> TimeBucket {
    TimeBucket::at(clock.now_millis(), offset)
}
