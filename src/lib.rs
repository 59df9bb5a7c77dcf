//! Bazaar: one query, every marketplace, one ranked list.
//!
//! This crate is the host around [`bazaar_engine`]:
//! - **Configuration**: TOML file with engine settings, selector overrides
//!   and logging options ([`config`])
//! - **Logging**: `tracing` to stderr plus an optional rolling file ([`logging`])
//! - **Host bridge**: versioned newline-delimited JSON commands over
//!   stdin/stdout ([`host`]), served by the `bazaar-host` binary
//!
//! The search orchestration itself (planning, workers, correlation,
//! aggregation) lives in the `bazaar-engine` workspace member.

pub mod bazaar_dirs;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;

pub use bazaar_engine;
pub use config::{BazaarConfig, LoggingConfig};
pub use error::{BazaarError, Result};
