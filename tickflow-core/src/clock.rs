//! Wall-clock providers.
//!
//! Real-time mode compares the next scheduled engine time with the wall
//! clock. Tests swap in a [`MockClock`] whose time only moves when told to,
//! which makes real-time runs deterministic.

use crate::error::{FlowError, Result};
use crate::types::{EngineDelta, EngineTime};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock time for real-time evaluation.
pub trait WallClock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> EngineTime;

    /// Move time forward to `time` (mock-only operation).
    ///
    /// Real implementations should do nothing.
    fn advance_to(&self, time: EngineTime);

    /// Check if this is a mock clock.
    fn is_mock(&self) -> bool;
}

/// Real clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Create a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl WallClock for RealClock {
    fn now(&self) -> EngineTime {
        EngineTime::from_datetime(Utc::now())
    }

    fn advance_to(&self, _time: EngineTime) {}

    fn is_mock(&self) -> bool {
        false
    }
}

/// Mock clock with controllable time.
#[derive(Debug)]
pub struct MockClock {
    micros: AtomicI64,
}

impl MockClock {
    /// Create a mock clock at the given time.
    pub fn new(start: EngineTime) -> Self {
        Self {
            micros: AtomicI64::new(start.as_micros()),
        }
    }

    /// Create a mock clock fixed at the specified RFC 3339 time.
    pub fn fixed(iso_time: &str) -> Result<Self> {
        let dt = chrono::DateTime::parse_from_rfc3339(iso_time).map_err(|e| {
            FlowError::ConfigValue {
                field: "clock".into(),
                cause: format!("invalid RFC 3339 time '{}': {}", iso_time, e),
            }
        })?;
        Ok(Self::new(EngineTime::from_datetime(dt.with_timezone(&Utc))))
    }

    /// Advance time by `delta`.
    pub fn advance(&self, delta: EngineDelta) {
        self.micros.fetch_add(delta.as_micros(), Ordering::SeqCst);
    }

    /// Set the current time.
    pub fn set(&self, time: EngineTime) {
        self.micros.store(time.as_micros(), Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(EngineTime::from_micros(0))
    }
}

impl WallClock for MockClock {
    fn now(&self) -> EngineTime {
        EngineTime::from_micros(self.micros.load(Ordering::SeqCst))
    }

    fn advance_to(&self, time: EngineTime) {
        self.micros.fetch_max(time.as_micros(), Ordering::SeqCst);
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::new(EngineTime::from_secs(1));
        clock.advance(EngineDelta::from_millis(500));
        assert_eq!(clock.now(), EngineTime::from_micros(1_500_000));

        clock.advance_to(EngineTime::from_secs(1));
        assert_eq!(clock.now(), EngineTime::from_micros(1_500_000));

        clock.advance_to(EngineTime::from_secs(3));
        assert_eq!(clock.now(), EngineTime::from_secs(3));
        assert!(clock.is_mock());
    }

    #[test]
    fn mock_clock_fixed() {
        let clock = MockClock::fixed("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(clock.now(), EngineTime::from_millis(1_705_314_600_000));
        assert!(MockClock::fixed("yesterday").is_err());
    }

    #[test]
    fn real_clock_is_after_2020() {
        let clock = RealClock::new();
        assert!(clock.now() > EngineTime::from_secs(1_577_836_800));
        assert!(!clock.is_mock());
    }
}
