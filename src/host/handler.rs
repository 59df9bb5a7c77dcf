//! Search engine behind the host command channel.

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_engine::{
    OrchestratorContext, SearchCoordinator, SearchMessage, SearchResponse, SelectorExtractor,
};
use serde::{Deserialize, Serialize};

use crate::config::BazaarConfig;
use crate::error::{BazaarError, Result};

/// Snapshot answered to `runtime.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub live_workers: usize,
    pub pending_resolutions: usize,
    pub stopped: bool,
}

/// Backend the command router dispatches to.
#[async_trait]
pub trait SearchHandler: Send + Sync + 'static {
    /// Run one search. Per-site failures are inside the response; an
    /// error here means the search could not run at all.
    async fn search(&self, message: SearchMessage) -> Result<SearchResponse>;

    fn runtime_status(&self) -> RuntimeStatus;

    /// Drop registry entries whose worker vanished. Returns how many.
    async fn sweep(&self) -> Result<usize>;

    /// Tear every worker down. Returns how many were destroyed.
    async fn stop(&self) -> Result<usize>;
}

/// [`SearchHandler`] backed by an [`OrchestratorContext`].
#[derive(Debug, Clone)]
pub struct EngineHandler {
    coordinator: SearchCoordinator,
}

impl EngineHandler {
    /// Wrap an already started context.
    #[must_use]
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self {
            coordinator: SearchCoordinator::new(ctx),
        }
    }

    /// Build the HTTP-backed engine described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or if the HTTP client
    /// cannot be built.
    pub fn from_config(config: &BazaarConfig) -> Result<Self> {
        config.validate()?;
        let extractor = SelectorExtractor::default().with_overrides(config.selector_overrides()?);
        let ctx = bazaar_engine::http_context(config.engine.clone(), Arc::new(extractor))?;
        Ok(Self::new(ctx))
    }

    #[must_use]
    pub fn context(&self) -> &Arc<OrchestratorContext> {
        self.coordinator.context()
    }
}

#[async_trait]
impl SearchHandler for EngineHandler {
    async fn search(&self, message: SearchMessage) -> Result<SearchResponse> {
        if self.context().is_shut_down() {
            return Err(BazaarError::Channel("search runtime is stopped".to_owned()));
        }
        Ok(self.coordinator.handle_message(message).await)
    }

    fn runtime_status(&self) -> RuntimeStatus {
        let ctx = self.context();
        RuntimeStatus {
            live_workers: ctx.workers().live_count(),
            pending_resolutions: ctx.pending().len(),
            stopped: ctx.is_shut_down(),
        }
    }

    async fn sweep(&self) -> Result<usize> {
        Ok(self.context().workers().sweep_orphans().await)
    }

    async fn stop(&self) -> Result<usize> {
        Ok(self.context().shutdown().await)
    }
}
