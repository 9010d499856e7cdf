//! Realtime connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Reconnect interval the dashboard deploys with, lower than the library default.
pub const PRODUCTION_RECONNECT_INTERVAL_MS: u64 = 3000;

/// Connection manager configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket endpoint (`ws://` or `wss://`). Required.
    pub url: String,
    /// Whether unintended closes trigger automatic reconnection.
    pub reconnect: bool,
    /// Base reconnect delay in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeat pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Outbound messages retained while disconnected.
    pub message_queue_size: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: true,
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            message_queue_size: 100,
        }
    }
}

impl RealtimeSettings {
    /// Defaults pointed at `url`.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Settings used by the deployed dashboard: defaults with a 3s reconnect interval.
    #[must_use]
    pub fn production(url: impl Into<String>) -> Self {
        Self {
            reconnect_interval_ms: PRODUCTION_RECONNECT_INTERVAL_MS,
            ..Self::with_url(url)
        }
    }

    /// Base reconnect delay.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Heartbeat period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "realtime.url is required".to_string(),
            ));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "realtime.heartbeatIntervalMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
