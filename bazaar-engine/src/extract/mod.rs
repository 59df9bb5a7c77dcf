//! Boundary with the extraction collaborator.
//!
//! The heuristics that turn a marketplace page into listings live behind
//! the [`Extractor`] trait. The engine only relies on the wire messages in
//! [`protocol`]; [`SelectorExtractor`] is a CSS-selector implementation
//! used by the bundled HTTP worker platform.

pub mod protocol;
pub mod selector;

pub use protocol::{ExtractReply, ExtractRequest, PushNotification};
pub use selector::{SelectorExtractor, SiteSelectors};

use crate::error::SearchError;
use crate::types::{ResultItem, Site};

/// Turns a loaded marketplace page into listings.
///
/// Implementations must be `Send + Sync`; one extractor serves every
/// worker of a platform concurrently.
pub trait Extractor: Send + Sync {
    /// Extract listings from `html`, the page served at `page_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Extraction`] or [`SearchError::Parse`] when the
    /// page cannot be read. An empty page is `Ok(vec![])`.
    fn extract(&self, site: Site, page_url: &str, html: &str)
        -> Result<Vec<ResultItem>, SearchError>;
}
