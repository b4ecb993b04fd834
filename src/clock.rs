//! Monotonic wall-time source, injectable for tests.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::ticks::{DateTimeOffset, TICKS_PER_SECOND};

/// A source of the current wall-clock time. Constructor-injected into the
/// `Controller` so tests can drive time deterministically; implementations
/// must not rely on process-wide statics.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTimeOffset;
}

/// The real wall clock, backed by the system time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTimeOffset {
        DateTimeOffset::from_chrono(Utc::now().into())
    }
}

/// A clock whose value is set explicitly by the test and advances only when
/// told to. Useful for asserting exact timestamps on emitted events.
#[derive(Debug)]
pub struct TestClock {
    ticks: AtomicI64,
}

impl TestClock {
    pub fn new(start: DateTimeOffset) -> TestClock {
        TestClock {
            ticks: AtomicI64::new(start.ticks),
        }
    }

    pub fn advance_seconds(&self, seconds: f64) {
        self.ticks
            .fetch_add((seconds * TICKS_PER_SECOND as f64) as i64, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTimeOffset {
        DateTimeOffset {
            ticks: self.ticks.load(Ordering::SeqCst),
            offset_hours: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_deterministically() {
        let clock = TestClock::new(DateTimeOffset { ticks: 0, offset_hours: 0.0 });
        assert_eq!(clock.now().ticks, 0);
        clock.advance_seconds(1.0);
        assert_eq!(clock.now().ticks, TICKS_PER_SECOND);
    }
}
