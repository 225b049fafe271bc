//! Engine configuration.
//!
//! Loadable from YAML or from `TICKFLOW_*` environment variables; every
//! field has a default so partial documents are fine.

use crate::error::{FlowError, Result};
use crate::types::{EngineTime, MAX_ET, MIN_ST};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// How the evaluation clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Jump straight to the next scheduled time.
    #[default]
    Simulation,
    /// Wait for the wall clock to reach the next scheduled time.
    RealTime,
    /// Real-time, additionally recording push and component outputs.
    Record,
    /// Simulation driven by a previously recorded store.
    Replay,
}

impl EvaluationMode {
    /// Parse a mode from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "simulation" | "sim" => Some(Self::Simulation),
            "real_time" | "realtime" => Some(Self::RealTime),
            "record" => Some(Self::Record),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::RealTime => "real_time",
            Self::Record => "record",
            Self::Replay => "replay",
        }
    }

    /// Whether the clock follows the wall clock.
    #[must_use]
    pub fn is_real_time(&self) -> bool {
        matches!(self, Self::RealTime | Self::Record)
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Clock mode.
    pub mode: EvaluationMode,
    /// First evaluation time.
    pub start_time: EngineTime,
    /// Last evaluation time (inclusive).
    pub end_time: EngineTime,
    /// Bound on queued push messages.
    pub push_queue_capacity: usize,
    /// How many upstream levels a back trace follows.
    pub back_trace_depth: usize,
    /// Render input values into back traces.
    pub capture_values: bool,
    /// Longest single wait in real-time mode before re-checking the stop flag.
    pub max_wait_ms: u64,
    /// Prefix applied to every recordable id.
    pub recordable_id_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::Simulation,
            start_time: MIN_ST,
            end_time: MAX_ET,
            push_queue_capacity: 1024,
            back_trace_depth: 2,
            capture_values: false,
            max_wait_ms: 100,
            recordable_id_prefix: None,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mode = get("TICKFLOW_MODE")
            .and_then(|s| EvaluationMode::parse(&s))
            .unwrap_or(defaults.mode);

        let start_time = get("TICKFLOW_START_TIME_US")
            .and_then(|s| s.parse::<i64>().ok())
            .map(EngineTime::from_micros)
            .unwrap_or(defaults.start_time);

        let end_time = get("TICKFLOW_END_TIME_US")
            .and_then(|s| s.parse::<i64>().ok())
            .map(EngineTime::from_micros)
            .unwrap_or(defaults.end_time);

        let push_queue_capacity = get("TICKFLOW_PUSH_QUEUE_CAPACITY")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.push_queue_capacity);

        let back_trace_depth = get("TICKFLOW_BACK_TRACE_DEPTH")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.back_trace_depth);

        let capture_values = get("TICKFLOW_CAPTURE_VALUES")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.capture_values);

        let max_wait_ms = get("TICKFLOW_MAX_WAIT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.max_wait_ms);

        Self {
            mode,
            start_time,
            end_time,
            push_queue_capacity,
            back_trace_depth,
            capture_values,
            max_wait_ms,
            recordable_id_prefix: get("TICKFLOW_RECORDABLE_ID_PREFIX"),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| FlowError::YamlParse {
            path: "<string>".into(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| FlowError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|e| FlowError::YamlParse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), mode = ?config.mode, "Engine config loaded");
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.start_time < MIN_ST {
            return Err(FlowError::ConfigValue {
                field: "start_time".into(),
                cause: format!("must be at least {}", MIN_ST),
            });
        }
        if self.end_time > MAX_ET || self.end_time < self.start_time {
            return Err(FlowError::ConfigValue {
                field: "end_time".into(),
                cause: format!("must lie between start_time and {}", MAX_ET),
            });
        }
        if self.push_queue_capacity == 0 {
            return Err(FlowError::ConfigValue {
                field: "push_queue_capacity".into(),
                cause: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the start time.
    pub fn with_start_time(mut self, start: EngineTime) -> Self {
        self.start_time = start;
        self
    }

    /// Set the end time.
    pub fn with_end_time(mut self, end: EngineTime) -> Self {
        self.end_time = end;
        self
    }

    /// Set the push queue capacity.
    pub fn with_push_queue_capacity(mut self, capacity: usize) -> Self {
        self.push_queue_capacity = capacity.max(1);
        self
    }

    /// Set the back trace depth.
    pub fn with_back_trace_depth(mut self, depth: usize) -> Self {
        self.back_trace_depth = depth;
        self
    }

    /// Capture input values in back traces.
    pub fn with_capture_values(mut self, capture: bool) -> Self {
        self.capture_values = capture;
        self
    }

    /// Set the real-time wait slice.
    pub fn with_max_wait_ms(mut self, ms: u64) -> Self {
        self.max_wait_ms = ms.max(1);
        self
    }

    /// Set the recordable id prefix.
    pub fn with_recordable_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.recordable_id_prefix = Some(prefix.into());
        self
    }

    /// Real-time wait slice as a duration.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Apply the configured prefix to a recordable id.
    #[must_use]
    pub fn qualify_recordable_id(&self, id: &str) -> String {
        match &self.recordable_id_prefix {
            Some(prefix) => format!("{}.{}", prefix, id),
            None => id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, EvaluationMode::Simulation);
        assert_eq!(config.end_time, MAX_ET);
    }

    #[test]
    fn from_vars_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TICKFLOW_MODE", "real-time"),
            ("TICKFLOW_START_TIME_US", "1000"),
            ("TICKFLOW_PUSH_QUEUE_CAPACITY", "8"),
            ("TICKFLOW_CAPTURE_VALUES", "true"),
            ("TICKFLOW_BACK_TRACE_DEPTH", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.mode, EvaluationMode::RealTime);
        assert_eq!(config.start_time, EngineTime::from_micros(1000));
        assert_eq!(config.push_queue_capacity, 8);
        assert!(config.capture_values);
        assert_eq!(config.back_trace_depth, 2);
    }

    #[test]
    fn yaml_partial_document() {
        let config = EngineConfig::from_yaml_str("mode: replay\nback_trace_depth: 4\n").unwrap();
        assert_eq!(config.mode, EvaluationMode::Replay);
        assert_eq!(config.back_trace_depth, 4);
        assert_eq!(config.push_queue_capacity, 1024);
    }

    #[test]
    fn yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "start_time: 10\nend_time: 20\ncapture_values: true").unwrap();
        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.start_time, EngineTime::from_micros(10));
        assert!(config.capture_values);

        let err = EngineConfig::from_yaml_file("/nonexistent/tickflow.yaml").unwrap_err();
        assert_eq!(err.code(), "E901");
    }

    #[test]
    fn invalid_bounds_rejected() {
        let err = EngineConfig::from_yaml_str("start_time: 20\nend_time: 10\n").unwrap_err();
        assert_eq!(err.code(), "E802");

        let err = EngineConfig::from_yaml_str("mode: [").unwrap_err();
        assert_eq!(err.code(), "E801");
    }

    #[test]
    fn recordable_id_prefix() {
        let config = EngineConfig::default().with_recordable_id_prefix("run1");
        assert_eq!(config.qualify_recordable_id("quotes"), "run1.quotes");
        assert_eq!(EngineConfig::default().qualify_recordable_id("quotes"), "quotes");
    }
}
