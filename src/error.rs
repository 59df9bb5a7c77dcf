//! Error types for the bazaar host.

use bazaar_engine::SearchError;

/// Top-level error type for the host application.
#[derive(Debug, thiserror::Error)]
pub enum BazaarError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed or unsupported host command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error raised by the search engine.
    #[error(transparent)]
    Engine(#[from] SearchError),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BazaarError>;
