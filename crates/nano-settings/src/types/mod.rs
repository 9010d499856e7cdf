//! Settings type definitions.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so that a
//! partial settings file deserializes with compiled defaults for every
//! missing key.

mod logging;
mod realtime;

pub use logging::{LogFormat, LogLevel, LoggingSettings};
pub use realtime::{PRODUCTION_RECONNECT_INTERVAL_MS, RealtimeSettings};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NanoSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Realtime connection settings.
    pub realtime: RealtimeSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for NanoSettings {
    fn default() -> Self {
        Self {
            version: nano_core::constants::VERSION.to_string(),
            name: nano_core::constants::NAME.to_string(),
            realtime: RealtimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl NanoSettings {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.realtime.validate()
    }
}
