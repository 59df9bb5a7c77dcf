//! Host configuration, persisted as TOML.
//!
//! ```toml
//! [engine]
//! job_timeout_seconds = 30
//!
//! [extract.vinted]
//! item = "div.feed-grid__item"
//! title = "h3"
//!
//! [logging]
//! filter = "info,bazaar_engine=debug"
//! file_enabled = true
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bazaar_engine::extract::SiteSelectors;
use bazaar_engine::{EngineConfig, Site};
use serde::{Deserialize, Serialize};

use crate::error::{BazaarError, Result};

/// Top-level configuration for the bazaar host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BazaarConfig {
    pub engine: EngineConfig,
    /// Selector overrides keyed by site key. An override replaces the
    /// site's built-in selectors as a whole.
    pub extract: BTreeMap<String, SiteSelectors>,
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// Also write a daily rolling log file.
    pub file_enabled: bool,
    /// Log file directory. Defaults to the platform data directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            file_enabled: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory log files are written to.
    #[must_use]
    pub fn effective_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(crate::bazaar_dirs::logs_dir)
    }
}

impl BazaarConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BazaarError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BazaarError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/bazaar/config.toml`,
    /// or `$BAZAAR_CONFIG_DIR/config.toml` when set.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::bazaar_dirs::config_file()
    }

    /// Load `path` if it exists, otherwise return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    /// Validate the engine settings and the selector override keys.
    ///
    /// # Errors
    ///
    /// Returns [`BazaarError::Engine`] for invalid engine settings and
    /// [`BazaarError::Config`] for an override naming an unknown site.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.selector_overrides()?;
        Ok(())
    }

    /// Selector overrides with their keys resolved to sites.
    ///
    /// # Errors
    ///
    /// Returns [`BazaarError::Config`] for an unknown site key.
    pub fn selector_overrides(&self) -> Result<HashMap<Site, SiteSelectors>> {
        self.extract
            .iter()
            .map(|(key, selectors)| {
                let site = Site::parse(key).ok_or_else(|| {
                    BazaarError::Config(format!("[extract.{key}] names an unknown site"))
                })?;
                Ok((site, selectors.clone()))
            })
            .collect()
    }
}
