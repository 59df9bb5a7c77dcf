//! Application directory paths for bazaar.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/bazaar/` | `~/.config/bazaar/` |
//! | Data (logs) | `~/Library/Application Support/bazaar/` | `~/.local/share/bazaar/` |
//!
//! # Environment Overrides
//!
//! - `BAZAAR_CONFIG_DIR` overrides [`config_dir`]
//! - `BAZAAR_DATA_DIR` overrides [`data_dir`]

use std::path::PathBuf;

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/bazaar/` by default. Override with
/// the `BAZAAR_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BAZAAR_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("bazaar"))
        .unwrap_or_else(|| PathBuf::from("/tmp/bazaar-config"))
}

/// Application data root, home of the log directory.
///
/// Resolves to `dirs::data_dir()/bazaar/` by default. Override with
/// the `BAZAAR_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BAZAAR_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("bazaar"))
        .unwrap_or_else(|| PathBuf::from("/tmp/bazaar-data"))
}

/// Config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}
