//! Top-level search entry point.
//!
//! Plans the request, runs every site job concurrently with
//! [`futures::future::join_all`] (a join: all jobs reach a terminal state
//! before anything is merged), then aggregates.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, trace};

use crate::context::OrchestratorContext;
use crate::error::SearchError;
use crate::protocol::{SearchMessage, SearchResponse};
use crate::types::{AggregatedResponse, SearchRequest};

use super::aggregate::aggregate;
use super::job::SiteSearchJob;
use super::planner::VariantPlanner;

#[derive(Debug, Clone)]
pub struct SearchCoordinator {
    ctx: Arc<OrchestratorContext>,
    planner: VariantPlanner,
}

impl SearchCoordinator {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        let planner = VariantPlanner::new(ctx.config());
        Self { ctx, planner }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.ctx
    }

    /// Run one search end to end.
    ///
    /// Site failures never fail the search: a failed or timed-out job
    /// simply contributes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Planning`] or [`SearchError::Aggregation`]
    /// only.
    pub async fn search(&self, request: &SearchRequest) -> Result<AggregatedResponse, SearchError> {
        let started = Instant::now();
        let plan = self.planner.plan(request, || self.ctx.next_job_id())?;
        trace!(query = %request.query, "search request");
        info!(
            variants = plan.variants.len(),
            jobs = plan.active_jobs().count(),
            "search started"
        );

        let jobs = plan
            .jobs
            .into_iter()
            .map(|spec| SiteSearchJob::new(spec).run(&self.ctx));
        let outcomes = futures::future::join_all(jobs).await;
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();

        let response = aggregate(outcomes)?;
        info!(
            results = response.results.len(),
            completed_sites = response.completed_sites.len(),
            failed_jobs = failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        Ok(response)
    }

    /// Answer a calling-layer message.
    pub async fn handle_message(&self, message: SearchMessage) -> SearchResponse {
        match message {
            SearchMessage::Search(request) => self.search(&request).await.into(),
        }
    }

    /// Answer a raw JSON message; an unparseable one gets a failure response.
    pub async fn handle_value(&self, value: serde_json::Value) -> SearchResponse {
        match SearchMessage::parse(value) {
            Ok(message) => self.handle_message(message).await,
            Err(err) => SearchResponse::failure(&err),
        }
    }
}
