//! Ground mission clock.
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current mission time, Unix milliseconds.
pub trait TimeService: Send + Sync {
    fn mission_time(&self) -> i64;
}

/// Mission time from the host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeService for WallClock {
    fn mission_time(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Mission time that only changes when set, for simulations and replay.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self(AtomicI64::new(millis))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::Relaxed);
    }
}

impl TimeService for FixedClock {
    fn mission_time(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(5);
        assert_eq!(clock.mission_time(), 5);
        clock.set(6);
        assert_eq!(clock.mission_time(), 6);
    }

    #[test]
    fn test_wall_clock_is_after_2020() {
        assert!(WallClock.mission_time() > 1_577_836_800_000);
    }
}
