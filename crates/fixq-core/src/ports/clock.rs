//! Clock port.
//!
//! - `SystemClock`: wall clock.
//! - `FixedClock`: settable clock for tests.
//! - `MonotonicStamp`: hands out strictly increasing write timestamps on top
//!   of any clock, so "latest by timestamp" stays well defined when the wall
//!   clock stalls or steps backwards.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Current time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Issues write timestamps that never repeat and never go backwards.
///
/// Resolution is one microsecond, matching what the stores persist.
pub struct MonotonicStamp {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicStamp {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Next timestamp: `max(now, last + 1µs)`, truncated to microseconds.
    pub fn next(&self) -> DateTime<Utc> {
        let now = truncate_micros(self.clock.now());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = match *last {
            Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    /// Plain clock reading (claim times, deadlines in logs).
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Default for MonotonicStamp {
    fn default() -> Self {
        Self::system()
    }
}

fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        assert_eq!(clock.now(), t0);

        clock.advance(ChronoDuration::seconds(5));
        assert_eq!(clock.now(), t0 + ChronoDuration::seconds(5));

        clock.set(t0);
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn stamps_strictly_increase_on_a_stalled_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let stamp = MonotonicStamp::new(Arc::new(FixedClock::new(t0)));

        let a = stamp.next();
        let b = stamp.next();
        let c = stamp.next();
        assert_eq!(a, t0);
        assert_eq!(b, t0 + ChronoDuration::microseconds(1));
        assert_eq!(c, t0 + ChronoDuration::microseconds(2));
    }

    #[test]
    fn stamps_do_not_follow_the_clock_backwards() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        let stamp = MonotonicStamp::new(Arc::new(clock.clone()));

        let a = stamp.next();
        clock.set(t0 - ChronoDuration::seconds(30));
        let b = stamp.next();
        assert!(b > a);

        clock.set(t0 + ChronoDuration::seconds(30));
        assert_eq!(stamp.next(), t0 + ChronoDuration::seconds(30));
    }

    #[test]
    fn stamps_are_truncated_to_microseconds() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let stamp = MonotonicStamp::new(Arc::new(FixedClock::new(t)));
        assert_eq!(stamp.next().timestamp_subsec_nanos(), 123_456_000);
    }
}
