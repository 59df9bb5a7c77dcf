//! Error types for the bazaar-engine crate.
//!
//! Job-level variants ([`SearchError::ResourceCreation`],
//! [`SearchError::Extraction`], [`SearchError::Timeout`]) are caught at the
//! job boundary and never reach the caller of a search. Only planner and
//! aggregator failures surface as an overall error.

/// Errors that can occur while orchestrating a marketplace search.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// The worker platform could not create a rendering context.
    #[error("worker creation failed: {0}")]
    ResourceCreation(String),

    /// The extraction collaborator reported a failure or sent a malformed payload.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A job did not resolve before its deadline.
    #[error("job timed out: {0}")]
    Timeout(String),

    /// A result arrived for a worker with no registered resolver.
    #[error("correlation error: {0}")]
    Correlation(String),

    /// The variant planner could not build a plan for the request.
    #[error("planning error: {0}")]
    Planning(String),

    /// The aggregator could not merge the job outcomes.
    #[error("aggregation error: {0}")]
    Aggregation(String),

    /// An HTTP request for a marketplace page failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Failed to parse a marketplace page or a wire message.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl SearchError {
    /// Whether this error belongs to a single job rather than the whole search.
    pub fn is_job_level(&self) -> bool {
        matches!(
            self,
            Self::ResourceCreation(_) | Self::Extraction(_) | Self::Timeout(_) | Self::Http(_)
        )
    }
}

/// Convenience type alias for bazaar-engine results.
pub type Result<T> = std::result::Result<T, SearchError>;
