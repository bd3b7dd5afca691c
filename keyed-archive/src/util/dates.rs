/*!
 Contains date conversion functions for Apple's `NSDate` representation.

 Apple stores dates as a floating point count of seconds since `2001-01-01T00:00:00Z`.
*/

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and Apple's reference date, `2001-01-01T00:00:00Z`
pub const APPLE_EPOCH_OFFSET: f64 = 978_307_200.0;
/// Number of microseconds in a second
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// A point in time as stored in an archive: seconds since Apple's reference date
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp {
    offset: f64,
}

impl Timestamp {
    /// Create a timestamp from seconds since `2001-01-01T00:00:00Z`
    pub fn from_apple_offset(offset: f64) -> Self {
        Self { offset }
    }

    /// Create a timestamp from seconds since the Unix epoch
    pub fn from_unix(seconds: f64) -> Self {
        Self {
            offset: seconds - APPLE_EPOCH_OFFSET,
        }
    }

    /// Seconds since `2001-01-01T00:00:00Z`, as written to the archive
    pub fn apple_offset(&self) -> f64 {
        self.offset
    }

    /// Seconds since the Unix epoch
    pub fn unix(&self) -> f64 {
        self.offset + APPLE_EPOCH_OFFSET
    }

    /// Create a timestamp from a UTC date, keeping microsecond precision
    pub fn from_datetime(date: &DateTime<Utc>) -> Self {
        let micros = date.timestamp_subsec_micros() as f64 / MICROS_PER_SECOND;
        Self::from_unix(date.timestamp() as f64 + micros)
    }

    /// Convert to a UTC date, rounded to the nearest microsecond.
    ///
    /// Returns `None` if the timestamp is not finite or is outside of the range `chrono` can represent.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let micros = (self.unix() * MICROS_PER_SECOND).round();
        if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
            return None;
        }
        let micros = micros as i64;
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self::from_datetime(&date)
    }
}
