//! Package-level constants.

/// Current version of NanoDesigner (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "nanodesigner";

/// Directory under `$HOME` holding user configuration.
pub const CONFIG_DIR_NAME: &str = ".nanodesigner";
