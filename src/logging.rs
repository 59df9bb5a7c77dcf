//! Tracing subscriber setup for the host binary.
//!
//! Stdout carries the JSON protocol, so diagnostics go to stderr and,
//! optionally, to a daily rolling file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{BazaarError, Result};

/// File name prefix of rolling log files.
pub const LOG_FILE_PREFIX: &str = "bazaar-host.log";

/// Build the filter: `RUST_LOG` when set, the configured directives otherwise.
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it
/// alive for the life of the process or buffered lines are lost.
///
/// # Errors
///
/// Returns [`BazaarError::Io`] if the log directory cannot be created and
/// [`BazaarError::Config`] if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = if config.file_enabled {
        let directory = config.effective_directory();
        std::fs::create_dir_all(&directory)?;
        let appender = tracing_appender::rolling::daily(&directory, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BazaarError::Config(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}
