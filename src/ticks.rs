//! Tick-based duration and timestamp primitives.
//!
//! The persisted file format names its timestamp attribute
//! `startTimeDotNetDateTimeOffsetTicks`: a count of 100-nanosecond intervals,
//! the same representation .NET's `DateTime`/`DateTimeOffset` use. The
//! in-memory model uses the same unit throughout so no lossy conversion
//! happens at the persistence boundary.

use std::ops::{Add, Sub};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Number of ticks (100ns units) per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// .NET's tick epoch (`0001-01-01T00:00:00`) expressed as ticks before the
/// Unix epoch. Used only to translate to/from `chrono` for human-facing
/// construction; the controller and persistor never need it internally.
const NET_EPOCH_TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// A duration expressed as a tick count. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub fn from_seconds(seconds: f64) -> Ticks {
        Ticks((seconds * TICKS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Ticks {
    type Output = Ticks;
    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 + rhs.0)
    }
}

impl Sub for Ticks {
    type Output = Ticks;
    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 - rhs.0)
    }
}

/// An Epoch's or Stimulus's duration: either a fixed tick count, or
/// indefinite (no predetermined end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochDuration {
    Definite(Ticks),
    Indefinite,
}

impl EpochDuration {
    pub fn is_indefinite(self) -> bool {
        matches!(self, EpochDuration::Indefinite)
    }

    /// `None` for an indefinite duration.
    pub fn ticks(self) -> Option<Ticks> {
        match self {
            EpochDuration::Definite(t) => Some(t),
            EpochDuration::Indefinite => None,
        }
    }
}

/// A point in time: a tick count plus a UTC offset in hours, matching the
/// persisted `DATETIMEOFFSET` compound type (`ticks: i64, offsetHours: f64`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateTimeOffset {
    pub ticks: i64,
    pub offset_hours: f64,
}

impl DateTimeOffset {
    pub fn from_chrono(dt: DateTime<FixedOffset>) -> DateTimeOffset {
        let unix_ticks = dt.timestamp() * TICKS_PER_SECOND
            + (dt.timestamp_subsec_nanos() as i64) / 100;
        DateTimeOffset {
            ticks: unix_ticks + NET_EPOCH_TICKS_AT_UNIX_EPOCH,
            offset_hours: dt.offset().local_minus_utc() as f64 / 3600.0,
        }
    }

    pub fn to_chrono(self) -> Option<DateTime<FixedOffset>> {
        let unix_ticks = self.ticks - NET_EPOCH_TICKS_AT_UNIX_EPOCH;
        let unix_seconds = unix_ticks.div_euclid(TICKS_PER_SECOND);
        let remainder_ticks = unix_ticks.rem_euclid(TICKS_PER_SECOND);
        let nanos = (remainder_ticks * 100) as u32;
        let offset = FixedOffset::east_opt((self.offset_hours * 3600.0).round() as i32)?;
        DateTime::from_timestamp(unix_seconds, nanos).map(|dt| dt.with_timezone(&offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ticks_from_seconds_round_trips() {
        let t = Ticks::from_seconds(1.5);
        assert_eq!(t, Ticks(15_000_000));
        assert_eq!(t.as_seconds(), 1.5);
    }

    #[test]
    fn datetimeoffset_round_trips_through_chrono() {
        let original = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap();
        let dto = DateTimeOffset::from_chrono(original);
        let back = dto.to_chrono().unwrap();
        assert_eq!(original.timestamp(), back.timestamp());
    }

    #[test]
    fn epoch_duration_indefinite_has_no_ticks() {
        assert_eq!(EpochDuration::Indefinite.ticks(), None);
        assert!(EpochDuration::Indefinite.is_indefinite());
        assert_eq!(EpochDuration::Definite(Ticks(10)).ticks(), Some(Ticks(10)));
    }
}
