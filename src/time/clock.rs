//! Wall and monotonic clock sources
//!
//! The time authority needs both readings to detect drift, so they are
//! grouped behind one trait and injected, which lets tests move each clock
//! independently.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Source of local wall-clock and monotonic readings, both in milliseconds
pub trait Clock: Send + Sync {
    /// Wall-clock epoch milliseconds
    fn wall_ms(&self) -> i64;

    /// Milliseconds on a clock that never jumps backwards
    fn monotonic_ms(&self) -> i64;
}

/// Process clock backed by `chrono::Utc` and `std::time::Instant`
#[derive(Debug, Clone)]
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
    fn wall_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn monotonic_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Hand-driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    wall: AtomicI64,
    monotonic: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `wall_ms` with the monotonic clock at zero
    pub fn new(wall_ms: i64) -> Self {
        Self {
            wall: AtomicI64::new(wall_ms),
            monotonic: AtomicI64::new(0),
        }
    }

    /// Advance both clocks together
    pub fn advance(&self, ms: i64) {
        self.wall.fetch_add(ms, Ordering::SeqCst);
        self.monotonic.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move only the wall clock, as an NTP step or manual change would
    pub fn jump_wall(&self, ms: i64) {
        self.wall.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the wall clock to an absolute value
    pub fn set_wall(&self, wall_ms: i64) {
        self.wall.store(wall_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_ms(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_ms(&self) -> i64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance(250);
        assert_eq!(clock.wall_ms(), 1_250);
        assert_eq!(clock.monotonic_ms(), 250);
    }

    #[test]
    fn test_manual_clock_jump_only_moves_wall() {
        let clock = ManualClock::new(1_000);
        clock.jump_wall(-500);
        assert_eq!(clock.wall_ms(), 500);
        assert_eq!(clock.monotonic_ms(), 0);
    }

    #[test]
    fn test_system_clock_monotonic_non_decreasing() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
        assert!(clock.wall_ms() > 1_600_000_000_000);
    }
}
