//! # nano-logging
//!
//! Structured logging via `tracing`.
//!
//! - [`init`] installs the global subscriber from [`LoggingSettings`]
//! - [`init_subscriber`] / [`init_json_subscriber`] for explicit formats
//! - [`capture_logs`] records events in memory for test assertions
//!
//! `RUST_LOG` always takes precedence over the configured level.

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use nano_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber described by `settings`.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init(settings: &LoggingSettings) {
    let level = settings.level.as_filter_str();
    match settings.format {
        LogFormat::Compact => init_subscriber(level),
        LogFormat::Json => init_json_subscriber(level),
    }
}

/// Initialize the global subscriber with compact human-readable stderr output.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with one JSON object per line on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
