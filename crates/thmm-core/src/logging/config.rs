//! Logging configuration.
//!
//! Supports configuration via environment variables (THMM_LOG, RUST_LOG,
//! THMM_LOG_FORMAT) or explicit overrides from the embedding program.

use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" | "structured" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Fit start/finish and convergence (default).
    #[default]
    Info,
    /// Skipped states and other degraded updates.
    Warn,
    Error,
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        use tracing_subscriber::filter::LevelFilter;
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Minimum log level.
    pub level: LogLevel,
    /// Whether to include timestamps in human output.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Build a config from the environment, with explicit overrides winning.
    ///
    /// Level: `level_override` > THMM_LOG > RUST_LOG (when it is a bare level) > info.
    /// Format: `format_override` > THMM_LOG_FORMAT > human.
    pub fn from_env(level_override: Option<LogLevel>, format_override: Option<LogFormat>) -> Self {
        Self::from_lookup(level_override, format_override, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        level_override: Option<LogLevel>,
        format_override: Option<LogFormat>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let level = level_override
            .or_else(|| lookup("THMM_LOG").and_then(|v| v.parse().ok()))
            .or_else(|| lookup("RUST_LOG").and_then(|v| v.parse().ok()))
            .unwrap_or_default();

        let format = format_override
            .or_else(|| lookup("THMM_LOG_FORMAT").and_then(|v| v.parse().ok()))
            .unwrap_or_default();

        Self {
            format,
            level,
            ..Self::default()
        }
    }

    /// Human output without timestamps, for tests and snapshots.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }
}
