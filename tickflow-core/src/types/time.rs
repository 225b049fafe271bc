//! Logical engine time.
//!
//! Engine time is an integer count of microseconds since the UNIX epoch. The
//! smallest step the clock can take is [`MIN_DT`]; two ticks are never closer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A point in engine time, in microseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineTime(i64);

/// A span of engine time, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineDelta(i64);

/// Smallest increment between two ticks.
pub const MIN_DT: EngineDelta = EngineDelta(1);

/// Earliest valid start time.
pub const MIN_ST: EngineTime = EngineTime(1);

/// Upper sentinel: 2300-01-01T00:00:00Z. Scheduling at this time means "never".
pub const MAX_DT: EngineTime = EngineTime(10_413_792_000_000_000);

/// Latest valid end time.
pub const MAX_ET: EngineTime = EngineTime(10_413_792_000_000_000 - 1);

impl EngineTime {
    /// Marker for "never modified" / "never sampled".
    pub const NEVER: Self = Self(i64::MIN);

    /// Create from microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Create from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    /// Create from whole seconds since the epoch.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000)
    }

    /// Microseconds since the epoch.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Whether this is the [`EngineTime::NEVER`] sentinel.
    #[must_use]
    pub const fn is_never(&self) -> bool {
        self.0 == i64::MIN
    }

    /// Convert to a UTC datetime, if representable.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }

    /// Create from a UTC datetime.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }
}

impl EngineDelta {
    /// Zero-length delta.
    pub const ZERO: Self = Self(0);

    /// Create from microseconds.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Create from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    /// Create from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000)
    }

    /// Length in microseconds.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Convert to a std duration, clamping negatives to zero.
    #[must_use]
    pub fn to_std(&self) -> Duration {
        Duration::from_micros(self.0.max(0) as u64)
    }
}

impl From<Duration> for EngineDelta {
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
    }
}

impl Add<EngineDelta> for EngineTime {
    type Output = EngineTime;

    fn add(self, rhs: EngineDelta) -> EngineTime {
        EngineTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub<EngineDelta> for EngineTime {
    type Output = EngineTime;

    fn sub(self, rhs: EngineDelta) -> EngineTime {
        EngineTime(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<EngineTime> for EngineTime {
    type Output = EngineDelta;

    fn sub(self, rhs: EngineTime) -> EngineDelta {
        EngineDelta(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return write!(f, "never");
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
            None => write!(f, "{}us", self.0),
        }
    }
}

impl fmt::Display for EngineDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = EngineTime::from_secs(10);
        assert_eq!(t + EngineDelta::from_millis(5), EngineTime::from_micros(10_005_000));
        assert_eq!((t + MIN_DT) - t, MIN_DT);
        assert_eq!(t - EngineDelta::from_secs(1), EngineTime::from_secs(9));
    }

    #[test]
    fn never_sorts_first_and_saturates() {
        assert!(EngineTime::NEVER < MIN_ST);
        assert!(EngineTime::NEVER.is_never());
        assert_eq!(EngineTime::NEVER - MIN_DT, EngineTime::NEVER);
        assert!(MAX_ET < MAX_DT);
    }

    #[test]
    fn display_is_iso() {
        let t = EngineTime::from_millis(1_705_314_600_000);
        assert_eq!(t.to_string(), "2024-01-15T10:30:00.000000Z");
        assert_eq!(EngineTime::NEVER.to_string(), "never");
    }

    #[test]
    fn std_duration_conversion() {
        let d: EngineDelta = Duration::from_millis(3).into();
        assert_eq!(d, EngineDelta::from_micros(3_000));
        assert_eq!(EngineDelta::from_micros(-5).to_std(), Duration::ZERO);
    }
}
