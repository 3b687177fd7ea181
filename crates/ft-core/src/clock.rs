//! Time sources.
//!
//! Event-log timestamps come from the wall clock. Live session timing uses a
//! monotonic clock so device time changes cannot corrupt a running session.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::Utc;

/// Provides wall-clock and monotonic time in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn wall_millis(&self) -> i64;

    /// Milliseconds on a clock that never goes backwards.
    fn monotonic_millis(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn monotonic_millis(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// A hand-driven clock. Both readings advance together.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall: AtomicI64,
    monotonic: AtomicI64,
}

impl ManualClock {
    pub const fn new(wall_millis: i64, monotonic_millis: i64) -> Self {
        Self {
            wall: AtomicI64::new(wall_millis),
            monotonic: AtomicI64::new(monotonic_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.wall.fetch_add(millis, Ordering::SeqCst);
        self.monotonic.fetch_add(millis, Ordering::SeqCst);
    }

    /// Moves only the wall clock, as a user changing the device time would.
    pub fn set_wall(&self, wall_millis: i64) {
        self.wall.store(wall_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_millis(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_millis(&self) -> i64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}
