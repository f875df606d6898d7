//! Deadlines and clocks
//!
//! All timestamps in the coordination core are milliseconds since the Unix
//! epoch held in an `i64`, matching the Kafka protocol. Deadlines are computed
//! once when an event is created and never recomputed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compute the absolute deadline for an operation started at `now_ms` that
/// may run for `timeout_ms`.
///
/// Saturates instead of overflowing. A zero or negative timeout produces a
/// deadline at or before `now_ms`, so the next reaper pass expires it.
pub fn calculate_deadline(now_ms: i64, timeout_ms: i64) -> i64 {
    now_ms.saturating_add(timeout_ms)
}

/// Milliseconds left until `deadline_ms`, never negative
pub fn remaining_ms(now_ms: i64, deadline_ms: i64) -> i64 {
    deadline_ms.saturating_sub(now_ms).max(0)
}

/// Source of the current time
///
/// Both threads share one clock so that the caller's blocking wait and the
/// reaper agree on when a deadline has passed.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds
    fn now_ms(&self) -> i64;
}

/// Whole milliseconds in `elapsed`, saturating at `i64::MAX`
fn saturating_millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(saturating_millis)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
///
/// Used to drive deadlines deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
