//! Engine configuration with sensible defaults.
//!
//! [`EngineConfig`] controls job deadlines, the pull-channel polling and
//! retry policy, the orphan sweep interval, and page-loading behaviour.
//! The defaults match the production timings; tests shrink them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SearchError;

/// Maximum number of keyword variants planned for one query.
pub const MAX_VARIANTS: usize = 2;

/// Number of reference-site listings returned as price anchors.
pub const REFERENCE_PRICE_COUNT: usize = 5;

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-job deadline in seconds. Neither channel resolving by then fails the job.
    pub job_timeout_seconds: u64,
    /// Wait after "load complete" before asking for extraction (client-side rendering lag).
    pub settle_delay_ms: u64,
    /// Delay between load-status polls.
    pub load_poll_interval_ms: u64,
    /// Load-status polls before the pull channel gives up.
    pub load_poll_max_attempts: u32,
    /// Delay between extraction retries.
    pub extract_retry_interval_ms: u64,
    /// Extraction attempts before the job resolves empty.
    pub extract_max_attempts: u32,
    /// Interval of the orphaned-worker sweep.
    pub sweep_interval_seconds: u64,
    /// Radius of local searches.
    pub local_radius_km: u32,
    /// HTTP timeout for a single page load.
    pub request_timeout_seconds: u64,
    /// Custom User-Agent. If `None`, rotates through built-in browser agents.
    pub user_agent: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_timeout_seconds: 30,
            settle_delay_ms: 1_500,
            load_poll_interval_ms: 500,
            load_poll_max_attempts: 60,
            extract_retry_interval_ms: 2_000,
            extract_max_attempts: 10,
            sweep_interval_seconds: 120,
            local_radius_km: 30,
            request_timeout_seconds: 20,
            user_agent: None,
        }
    }
}

impl EngineConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `job_timeout_seconds`, `request_timeout_seconds` and
    ///   `sweep_interval_seconds` must be greater than 0
    /// - `load_poll_max_attempts` and `extract_max_attempts` must be greater than 0
    /// - `local_radius_km` must be greater than 0
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.job_timeout_seconds == 0 {
            return Err(SearchError::Config(
                "job_timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(SearchError::Config(
                "request_timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(SearchError::Config(
                "sweep_interval_seconds must be greater than 0".into(),
            ));
        }
        if self.load_poll_max_attempts == 0 {
            return Err(SearchError::Config(
                "load_poll_max_attempts must be greater than 0".into(),
            ));
        }
        if self.extract_max_attempts == 0 {
            return Err(SearchError::Config(
                "extract_max_attempts must be greater than 0".into(),
            ));
        }
        if self.local_radius_km == 0 {
            return Err(SearchError::Config(
                "local_radius_km must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms)
    }

    pub fn extract_retry_interval(&self) -> Duration {
        Duration::from_millis(self.extract_retry_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
