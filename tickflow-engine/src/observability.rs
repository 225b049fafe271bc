//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; hosts decide where they go.
//! [`init_tracing`] installs a global subscriber with an `EnvFilter` and
//! one of three output formats.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line, human-readable.
    Pretty,
    /// Single-line.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    format: LogFormat,
    filter: String,
    include_location: bool,
    include_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: "info".to_string(),
            include_location: false,
            include_target: true,
        }
    }
}

impl TracingConfig {
    /// Read the configuration from the environment.
    ///
    /// - `TICKFLOW_LOG_FORMAT`: `json`, `pretty` or `compact`
    /// - `TICKFLOW_LOG_LEVEL`, else `RUST_LOG`: filter directives
    /// - `TICKFLOW_LOG_LOCATION`: `true`/`1` to include file and line
    pub fn from_env() -> Self {
        let format = env::var("TICKFLOW_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let filter = env::var("TICKFLOW_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        let include_location = env::var("TICKFLOW_LOG_LOCATION")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        Self {
            format,
            filter,
            include_location,
            include_target: true,
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the filter directives, e.g. `"info,tickflow_engine=debug"`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Include file and line in each event.
    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self
    }

    /// Include the event target.
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Output format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Filter directives.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("anything".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }

    #[test]
    fn builder_setters() {
        let config = TracingConfig::default()
            .with_format(LogFormat::Json)
            .with_filter("debug,tickflow_engine=trace");
        assert_eq!(config.format(), LogFormat::Json);
        assert_eq!(config.filter(), "debug,tickflow_engine=trace");
    }
}
