//! Correlates a worker's asynchronously arriving results with its job.
//!
//! Two independent channels race to resolve a job:
//!
//! - **push**: the collaborator sends `<SITE>_RESULTS` on its own, routed
//!   through [`OrchestratorContext::deliver_push`];
//! - **pull**: the engine polls the page's load status, waits for the
//!   page to settle, then asks for extraction with bounded retries.
//!
//! Both feed one [`Resolver`]; whichever fires first wins. A deadline
//! races the pair and resolves the job as timed out. However it ends, the
//! pending entry is removed and the worker released exactly once.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::context::OrchestratorContext;
use crate::error::SearchError;
use crate::extract::{ExtractReply, ExtractRequest};
use crate::types::{ResultItem, Site};
use crate::worker::{LoadStatus, WorkerHandle, WorkerId};

use super::resolver::{Resolution, Resolver};

/// Progress of one correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Dispatched,
    AwaitingLoad,
    ParseAttempted,
    Retrying,
    Resolved,
    TimedOut,
    Failed,
}

impl CorrelationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::TimedOut | Self::Failed)
    }
}

/// Final report of a correlation.
#[derive(Debug)]
pub struct CorrelationOutcome {
    pub worker: WorkerId,
    pub state: CorrelationState,
    /// Which channel resolved the job, if any did.
    pub channel: Option<&'static str>,
    pub result: Result<Vec<ResultItem>, SearchError>,
}

/// An in-flight correlation between a job and the worker serving it.
pub struct Correlation<'a> {
    ctx: &'a OrchestratorContext,
    handle: WorkerHandle,
    site: Site,
    resolver: Arc<Resolver>,
    receiver: oneshot::Receiver<Resolution>,
    state: Mutex<CorrelationState>,
    deadline: Instant,
}

impl<'a> Correlation<'a> {
    /// Register a resolver for `handle` and enter `Dispatched`. The
    /// deadline is one job timeout from now.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Correlation`] if the worker already has a
    /// pending resolution. The handle is released in that case.
    pub async fn begin(
        ctx: &'a OrchestratorContext,
        handle: WorkerHandle,
        site: Site,
    ) -> Result<Correlation<'a>, SearchError> {
        let (resolver, receiver) = Resolver::new(handle.id(), site);
        if let Err(err) = ctx.pending().register(Arc::clone(&resolver)) {
            ctx.workers().release(&handle).await;
            return Err(err);
        }
        trace!(worker = %handle.id(), site = site.name(), "correlation dispatched");
        Ok(Self {
            ctx,
            handle,
            site,
            resolver,
            receiver,
            state: Mutex::new(CorrelationState::Dispatched),
            deadline: Instant::now() + ctx.config().job_timeout(),
        })
    }

    /// Time out at `deadline` instead, e.g. one set before the worker was
    /// acquired.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn worker(&self) -> WorkerId {
        self.handle.id()
    }

    pub fn state(&self) -> CorrelationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Race push, pull and the deadline, then release the worker.
    pub async fn finish(self) -> CorrelationOutcome {
        let Self {
            ctx,
            handle,
            site,
            resolver,
            mut receiver,
            state,
            deadline,
        } = self;
        let worker = handle.id();
        let config = ctx.config();

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);
        let pull = pull_results(ctx, worker, site, &resolver, &state);
        tokio::pin!(pull);
        let mut pull_finished = false;

        let resolution = loop {
            tokio::select! {
                biased;
                delivered = &mut receiver => break delivered.ok(),
                () = &mut pull, if !pull_finished => {
                    pull_finished = true;
                }
                () = &mut deadline => {
                    resolver.resolve(Resolution::TimedOut);
                    break (&mut receiver).await.ok();
                }
            }
        };

        ctx.pending().remove(worker);
        ctx.workers().release(&handle).await;

        let channel = resolution.as_ref().map(Resolution::label);
        let (next, result) = match resolution {
            Some(Resolution::Pushed(items) | Resolution::Pulled(items)) => {
                (CorrelationState::Resolved, Ok(items))
            }
            Some(Resolution::ExtractionFailed(reason)) => {
                (CorrelationState::Failed, Err(SearchError::Extraction(reason)))
            }
            Some(Resolution::TimedOut) => (
                CorrelationState::TimedOut,
                Err(SearchError::Timeout(format!(
                    "{} gave no results within {}s",
                    site.name(),
                    config.job_timeout_seconds
                ))),
            ),
            None => (
                CorrelationState::Failed,
                Err(SearchError::Correlation(format!(
                    "resolver of {worker} dropped without resolving"
                ))),
            ),
        };
        transition(&state, worker, next);

        CorrelationOutcome {
            worker,
            state: next,
            channel,
            result,
        }
    }
}

impl std::fmt::Debug for Correlation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlation")
            .field("worker", &self.handle.id())
            .field("site", &self.site)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn transition(state: &Mutex<CorrelationState>, worker: WorkerId, next: CorrelationState) {
    let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
    if *current != next {
        trace!(%worker, from = ?*current, to = ?next, "correlation state");
        *current = next;
    }
}

/// The pull channel. Returns once it has resolved the job, noticed the
/// job was resolved elsewhere, or given up waiting for the page to load.
async fn pull_results(
    ctx: &OrchestratorContext,
    worker: WorkerId,
    site: Site,
    resolver: &Resolver,
    state: &Mutex<CorrelationState>,
) {
    let config = ctx.config();
    transition(state, worker, CorrelationState::AwaitingLoad);

    let mut loaded = false;
    for attempt in 1..=config.load_poll_max_attempts {
        if resolver.is_resolved() {
            return;
        }
        match ctx.workers().load_status(worker).await {
            Ok(LoadStatus::Complete) => {
                loaded = true;
                break;
            }
            Ok(LoadStatus::Loading) => {}
            Err(err) => trace!(%worker, attempt, error = %err, "load status unavailable"),
        }
        if attempt < config.load_poll_max_attempts {
            tokio::time::sleep(config.load_poll_interval()).await;
        }
    }
    if !loaded {
        debug!(%worker, site = site.name(), "page never finished loading, pull channel stopped");
        return;
    }

    tokio::time::sleep(config.settle_delay()).await;

    let mut last_error = String::new();
    for attempt in 1..=config.extract_max_attempts {
        if resolver.is_resolved() {
            return;
        }
        transition(state, worker, CorrelationState::ParseAttempted);
        match request_extraction(ctx, worker).await {
            Ok(items) => {
                let count = items.len();
                if resolver.resolve(Resolution::Pulled(items)) {
                    debug!(%worker, attempt, count, "pull resolved job");
                }
                return;
            }
            Err(err) => {
                trace!(%worker, attempt, error = %err, "extraction attempt failed");
                last_error = err.to_string();
            }
        }
        if attempt < config.extract_max_attempts {
            transition(state, worker, CorrelationState::Retrying);
            tokio::time::sleep(config.extract_retry_interval()).await;
        }
    }

    resolver.resolve(Resolution::ExtractionFailed(format!(
        "{} gave up after {} attempts: {last_error}",
        site.name(),
        config.extract_max_attempts
    )));
}

async fn request_extraction(
    ctx: &OrchestratorContext,
    worker: WorkerId,
) -> Result<Vec<ResultItem>, SearchError> {
    let raw = ctx.workers().extract(worker, &ExtractRequest::Extract).await?;
    ExtractReply::parse(raw)?.into_results()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{ScriptedPlatform, SiteScript};
    use crate::types::JobId;
    use crate::worker::{push_channel, WorkerPlatform};
    use std::time::Duration;

    const VINTED_URL: &str = "https://www.vinted.fr/catalog?search_text=veste";

    fn item(url: &str) -> ResultItem {
        ResultItem {
            title: "Veste".into(),
            url: url.into(),
            ..ResultItem::default()
        }
    }

    fn setup(script: SiteScript) -> (Arc<OrchestratorContext>, Arc<ScriptedPlatform>) {
        let (tx, rx) = push_channel();
        let platform = Arc::new(ScriptedPlatform::new().with_push(tx));
        platform.script(Site::Vinted, script);
        let ctx = OrchestratorContext::new(
            EngineConfig::default(),
            Arc::clone(&platform) as Arc<dyn WorkerPlatform>,
        )
        .expect("context");
        ctx.start(Some(rx));
        (ctx, platform)
    }

    async fn correlate(ctx: &OrchestratorContext) -> CorrelationOutcome {
        let handle = ctx
            .workers()
            .acquire(JobId(1), VINTED_URL)
            .await
            .expect("acquire");
        let correlation = Correlation::begin(ctx, handle, Site::Vinted)
            .await
            .expect("begin");
        assert_eq!(correlation.state(), CorrelationState::Dispatched);
        correlation.finish().await
    }

    #[tokio::test(start_paused = true)]
    async fn pull_resolves_after_settle_delay() {
        let (ctx, platform) = setup(SiteScript::pulls(vec![item("https://www.vinted.fr/items/1")]));
        let started = Instant::now();

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.state, CorrelationState::Resolved);
        assert_eq!(outcome.channel, Some("pull"));
        assert_eq!(outcome.result.expect("items").len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(ctx.workers().live_count(), 0);
        assert!(ctx.pending().is_empty());
        assert_eq!(platform.destroy_calls(outcome.worker), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_wins_when_page_never_loads() {
        let (ctx, _platform) = setup(SiteScript::pushes(
            Duration::from_secs(3),
            vec![item("https://www.vinted.fr/items/2")],
        ));

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.channel, Some("push"));
        assert_eq!(outcome.result.expect("items")[0].url, "https://www.vinted.fr/items/2");
        assert_eq!(ctx.workers().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_and_pull_both_arriving_resolve_once() {
        // Push lands during the settle delay, before any extraction request.
        let script = SiteScript::pulls(vec![item("https://www.vinted.fr/items/3")])
            .with_push(Duration::from_millis(700));
        let (ctx, platform) = setup(script);

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.channel, Some("push"));
        assert_eq!(outcome.result.expect("items").len(), 1);
        assert_eq!(platform.extract_calls(), 0);
        assert_eq!(platform.destroy_calls(outcome.worker), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_times_out_at_deadline() {
        let (ctx, platform) = setup(SiteScript::silent());
        let started = Instant::now();

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.state, CorrelationState::TimedOut);
        assert_eq!(outcome.channel, Some("timeout"));
        assert!(matches!(outcome.result, Err(SearchError::Timeout(_))));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert!(!ctx.workers().registry().contains(outcome.worker));
        assert!(!platform.is_live(outcome.worker));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_extractions_are_retried() {
        let script = SiteScript::pulls(vec![item("https://www.vinted.fr/items/4")]).failing_extracts(3);
        let (ctx, platform) = setup(script);

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.state, CorrelationState::Resolved);
        assert_eq!(platform.extract_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_with_extraction_error() {
        let config = EngineConfig {
            extract_max_attempts: 3,
            ..Default::default()
        };
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script(Site::Vinted, SiteScript::pulls(vec![]).malformed());
        let ctx = OrchestratorContext::new(config, Arc::clone(&platform) as Arc<dyn WorkerPlatform>)
            .expect("context");

        let outcome = correlate(&ctx).await;

        assert_eq!(outcome.state, CorrelationState::Failed);
        let Err(SearchError::Extraction(reason)) = outcome.result else {
            panic!("expected extraction failure");
        };
        assert!(reason.contains("3 attempts"));
        assert_eq!(platform.extract_calls(), 3);
        assert_eq!(ctx.workers().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_correlation_releases_handle() {
        let (ctx, platform) = setup(SiteScript::silent());
        let first = ctx
            .workers()
            .acquire(JobId(1), VINTED_URL)
            .await
            .expect("acquire");
        let worker = first.id();
        let (resolver, _rx) = Resolver::new(worker, Site::Vinted);
        ctx.pending().register(resolver).expect("register");

        let err = Correlation::begin(&ctx, first, Site::Vinted).await.unwrap_err();
        assert!(matches!(err, SearchError::Correlation(_)));
        assert!(!platform.is_live(worker));
        assert_eq!(ctx.workers().live_count(), 0);
    }
}
