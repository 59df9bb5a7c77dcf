//! One site search: acquire a worker, correlate its results, release it.
//!
//! The job deadline starts before the worker is acquired, so a platform
//! that never finishes creating a worker cannot hold the search open.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::OrchestratorContext;
use crate::error::SearchError;
use crate::types::ResultItem;
use crate::worker::{WorkerHandle, WorkerManager};

use super::correlator::Correlation;
use super::planner::JobSpec;

/// Terminal state of a job. A job never propagates its failure.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Resolved(Vec<ResultItem>),
    Failed(SearchError),
}

/// A finished job, paired with the spec that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub spec: JobSpec,
    pub state: JobState,
}

impl JobOutcome {
    /// Listings of the job; a failed job contributes nothing.
    pub fn items(&self) -> &[ResultItem] {
        match &self.state {
            JobState::Resolved(items) => items,
            JobState::Failed(_) => &[],
        }
    }

    pub fn into_items(self) -> Vec<ResultItem> {
        match self.state {
            JobState::Resolved(items) => items,
            JobState::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, JobState::Failed(_))
    }
}

/// Search of one site for one keyword variant in one geographic scope.
#[derive(Debug, Clone)]
pub struct SiteSearchJob {
    spec: JobSpec,
}

impl SiteSearchJob {
    pub fn new(spec: JobSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Run the job to completion. Inactive jobs resolve empty at once.
    pub async fn run(self, ctx: &OrchestratorContext) -> JobOutcome {
        let spec = self.spec;
        if !spec.active {
            return JobOutcome {
                spec,
                state: JobState::Resolved(Vec::new()),
            };
        }

        let state = match search(ctx, &spec).await {
            Ok(mut items) => {
                let key = spec.site.key();
                for item in items.iter_mut().filter(|i| i.site.is_empty()) {
                    item.site = key.to_owned();
                }
                debug!(
                    job = %spec.id,
                    site = spec.site.name(),
                    mode = %spec.mode(),
                    count = items.len(),
                    "job resolved"
                );
                JobState::Resolved(items)
            }
            Err(err) => {
                warn!(
                    job = %spec.id,
                    site = spec.site.name(),
                    mode = %spec.mode(),
                    error = %err,
                    "job failed"
                );
                JobState::Failed(err)
            }
        };
        JobOutcome { spec, state }
    }
}

async fn search(ctx: &OrchestratorContext, spec: &JobSpec) -> Result<Vec<ResultItem>, SearchError> {
    let deadline = Instant::now() + ctx.config().job_timeout();
    let handle = acquire_before(ctx, spec, deadline).await?;
    let correlation = Correlation::begin(ctx, handle, spec.site)
        .await?
        .with_deadline(deadline);
    correlation.finish().await.result
}

/// Acquire the job's worker, giving up at `deadline`.
///
/// Creation runs on its own task. If it outlives the deadline it is left
/// running and whatever worker it eventually produces is released.
async fn acquire_before(
    ctx: &OrchestratorContext,
    spec: &JobSpec,
    deadline: Instant,
) -> Result<WorkerHandle, SearchError> {
    let workers = Arc::clone(ctx.workers());
    let (owner, target_url) = (spec.id, spec.target_url.clone());
    let mut creating = tokio::spawn(async move { workers.acquire(owner, &target_url).await });

    match tokio::time::timeout_at(deadline, &mut creating).await {
        Ok(Ok(acquired)) => acquired,
        Ok(Err(join)) => Err(SearchError::ResourceCreation(format!(
            "worker creation task failed: {join}"
        ))),
        Err(_) => {
            release_late(Arc::clone(ctx.workers()), creating, ctx.config().job_timeout());
            Err(SearchError::Timeout(format!(
                "{} gave no worker within {}s",
                spec.site.name(),
                ctx.config().job_timeout_seconds
            )))
        }
    }
}

/// Release the worker of a creation that missed its job's deadline. A
/// creation still pending after `grace` is aborted.
fn release_late(
    workers: Arc<WorkerManager>,
    creating: JoinHandle<Result<WorkerHandle, SearchError>>,
    grace: Duration,
) {
    let abort = creating.abort_handle();
    tokio::spawn(async move {
        match tokio::time::timeout(grace, creating).await {
            Ok(Ok(Ok(handle))) => {
                debug!(worker = %handle.id(), job = %handle.owner(), "releasing late worker");
                workers.release(&handle).await;
            }
            Ok(_) => {}
            Err(_) => {
                warn!("worker creation still pending after its job timed out; aborting");
                abort.abort();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{ScriptedPlatform, SiteScript};
    use crate::types::{GeoScope, JobId, Site};
    use crate::worker::WorkerPlatform;
    use std::sync::Arc;

    fn spec(site: Site, active: bool) -> JobSpec {
        JobSpec {
            id: JobId(1),
            site,
            variant: 0,
            keyword: "perceuse".into(),
            scope: GeoScope::National {
                shippable_only: false,
            },
            target_url: if active {
                site.search_url("perceuse", &GeoScope::National { shippable_only: false }, &Default::default())
            } else {
                String::new()
            },
            active,
        }
    }

    fn context(platform: &Arc<ScriptedPlatform>) -> Arc<OrchestratorContext> {
        OrchestratorContext::new(
            EngineConfig::default(),
            Arc::clone(platform) as Arc<dyn WorkerPlatform>,
        )
        .expect("context")
    }

    #[tokio::test]
    async fn inactive_job_resolves_empty_without_worker() {
        let platform = Arc::new(ScriptedPlatform::new());
        let ctx = context(&platform);

        let outcome = SiteSearchJob::new(spec(Site::Vinted, false)).run(&ctx).await;

        assert_eq!(outcome.state, JobState::Resolved(vec![]));
        assert_eq!(platform.created_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_items_get_site_key() {
        let platform = Arc::new(ScriptedPlatform::new());
        let mut tagged = ResultItem {
            url: "https://www.ebay.fr/itm/2".into(),
            ..ResultItem::default()
        };
        tagged.site = "custom".into();
        platform.script(
            Site::Ebay,
            SiteScript::pulls(vec![
                ResultItem {
                    url: "https://www.ebay.fr/itm/1".into(),
                    ..ResultItem::default()
                },
                tagged,
            ]),
        );
        let ctx = context(&platform);

        let outcome = SiteSearchJob::new(spec(Site::Ebay, true)).run(&ctx).await;

        let items = outcome.items();
        assert_eq!(items[0].site, "ebay");
        assert_eq!(items[1].site, "custom");
        assert_eq!(ctx.workers().live_count(), 0);
    }

    #[tokio::test]
    async fn creation_failure_is_contained() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(Site::Amazon, SiteScript::failing_creation());
        let ctx = context(&platform);

        let outcome = SiteSearchJob::new(spec(Site::Amazon, true)).run(&ctx).await;

        assert!(outcome.is_failed());
        assert!(matches!(
            outcome.state,
            JobState::Failed(SearchError::ResourceCreation(_))
        ));
        assert!(outcome.clone().into_items().is_empty());
        assert_eq!(ctx.workers().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_contained() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(Site::Vinted, SiteScript::silent());
        let ctx = context(&platform);

        let outcome = SiteSearchJob::new(spec(Site::Vinted, true)).run(&ctx).await;

        assert!(matches!(outcome.state, JobState::Failed(SearchError::Timeout(_))));
        assert!(outcome.items().is_empty());
        assert_eq!(platform.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_creation_times_out_at_deadline() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(Site::Ebay, SiteScript::hanging_creation());
        let ctx = context(&platform);
        let started = Instant::now();

        let outcome = SiteSearchJob::new(spec(Site::Ebay, true)).run(&ctx).await;

        let elapsed = started.elapsed();
        assert!(matches!(outcome.state, JobState::Failed(SearchError::Timeout(_))));
        assert!(elapsed >= Duration::from_secs(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "{elapsed:?}");
        assert_eq!(platform.created_count(), 0);
        assert_eq!(ctx.workers().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_creation_shares_the_deadline_with_correlation() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(
            Site::Vinted,
            SiteScript::silent().creating_after(Duration::from_secs(20)),
        );
        let ctx = context(&platform);
        let started = Instant::now();

        let outcome = SiteSearchJob::new(spec(Site::Vinted, true)).run(&ctx).await;

        let elapsed = started.elapsed();
        assert!(matches!(outcome.state, JobState::Failed(SearchError::Timeout(_))));
        assert!(elapsed < Duration::from_secs(31), "{elapsed:?}");
        assert_eq!(platform.created_count(), 1);
        assert_eq!(platform.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_created_after_deadline_is_released() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(
            Site::Vinted,
            SiteScript::pulls(vec![]).creating_after(Duration::from_secs(40)),
        );
        let ctx = context(&platform);

        let outcome = SiteSearchJob::new(spec(Site::Vinted, true)).run(&ctx).await;
        assert!(matches!(outcome.state, JobState::Failed(SearchError::Timeout(_))));
        assert_eq!(platform.created_count(), 0);

        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(platform.created_count(), 1);
        assert_eq!(platform.live_count(), 0);
        assert_eq!(ctx.workers().live_count(), 0);
    }
}
