//! # nano-settings
//!
//! Configuration management with layered sources for NanoDesigner.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`NanoSettings::default()`]
//! 2. **User file**: `~/.nanodesigner/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `NANO_*` overrides (highest priority)
//!
//! The loaded value is returned to the caller and passed explicitly to the
//! components that need it; there is no process-wide settings global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
