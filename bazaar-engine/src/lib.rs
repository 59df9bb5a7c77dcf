//! # bazaar-engine
//!
//! Search orchestration for second-hand and new marketplace listings.
//!
//! One user query is fanned out to several marketplaces. Each site search
//! drives a short-lived worker that loads the marketplace's results page;
//! its listings come back either pushed by the extraction collaborator or
//! pulled by the engine, whichever is first. The combined listings are
//! deduplicated by canonical URL and ranked.
//!
//! ## Design
//!
//! - Every piece of shared state lives in one [`OrchestratorContext`]
//! - Workers are tracked in a registry and always released, swept or
//!   cleaned up; none outlives the engine
//! - Each job resolves exactly once, fails in isolation and is bounded by
//!   a deadline
//! - A failing marketplace never fails the search
//!
//! ## Security
//!
//! - Queries and target URLs are logged only at trace level
//! - No network listeners; pages are fetched outbound only

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod protocol;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod worker;

use std::sync::Arc;

pub use config::EngineConfig;
pub use context::OrchestratorContext;
pub use error::{Result, SearchError};
pub use extract::{Extractor, SelectorExtractor};
pub use orchestrator::SearchCoordinator;
pub use protocol::{SearchMessage, SearchResponse};
pub use types::{
    AggregatedResponse, ResultItem, SearchCriteria, SearchRequest, Site, UserLocation,
};
pub use worker::{HttpWorkerPlatform, WorkerPlatform};

/// Build and start a context backed by the bundled HTTP worker platform.
///
/// Workers push their listings as soon as their page loads, so most jobs
/// resolve through the push channel; the pull channel covers the rest.
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`SearchError::Config`] for an invalid configuration or
/// [`SearchError::Http`] if the HTTP client cannot be built.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> bazaar_engine::Result<()> {
/// use std::sync::Arc;
/// use bazaar_engine::{EngineConfig, SearchCoordinator, SearchRequest, SelectorExtractor};
///
/// let ctx = bazaar_engine::http_context(EngineConfig::default(), Arc::new(SelectorExtractor::default()))?;
/// let coordinator = SearchCoordinator::new(Arc::clone(&ctx));
/// let response = coordinator.search(&SearchRequest::new("perceuse sans fil")).await?;
/// for item in &response.results {
///     println!("{} {}: {}", item.site, item.title, item.url);
/// }
/// ctx.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub fn http_context(
    config: EngineConfig,
    extractor: Arc<dyn Extractor>,
) -> Result<Arc<OrchestratorContext>> {
    config.validate()?;
    let (push_tx, push_rx) = worker::push_channel();
    let platform = HttpWorkerPlatform::new(&config, extractor)?.with_push(push_tx);
    let ctx = OrchestratorContext::new(config, Arc::new(platform))?;
    ctx.start(Some(push_rx));
    Ok(ctx)
}
