//! Structured logging for the estimator.
//!
//! The library only emits `tracing` events; it never installs a subscriber.
//! Programs embedding the estimator call [`init_logging`] (or build their
//! own subscriber) once at startup.
//!
//! # Usage
//!
//! ```ignore
//! use thmm_core::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//! ```
//!
//! Output goes to stderr in either human or JSONL form. Every event carries
//! an `event` field from [`event_names`] and a `stage` field.

pub mod config;
pub mod events;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Stage};

use std::io::IsTerminal;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when no RUST_LOG directives are present.
fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .from_env_lossy()
}

/// Initialize the global subscriber.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is left in place.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config);

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
                .is_ok()
        }
    }
}

/// Initialize logging from the environment (for tests and simple programs).
pub fn init_default_logging() -> bool {
    init_logging(&LogConfig::from_env(None, None))
}
