//! Shared engine state: configuration, workers and pending resolutions.
//!
//! An [`OrchestratorContext`] is created once per engine and shared by every
//! search through an `Arc`. [`OrchestratorContext::start`] launches the
//! background tasks scoped to its lifetime (orphan sweeper, push router);
//! [`OrchestratorContext::shutdown`] cancels them and tears down every
//! remaining worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::SearchError;
use crate::extract::PushNotification;
use crate::orchestrator::resolver::{PendingResolutions, Resolution};
use crate::types::JobId;
use crate::worker::{PushReceiver, WorkerId, WorkerManager, WorkerPlatform};

pub struct OrchestratorContext {
    config: EngineConfig,
    workers: Arc<WorkerManager>,
    pending: PendingResolutions,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_job: AtomicU64,
}

impl OrchestratorContext {
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if `config` fails validation.
    pub fn new(
        config: EngineConfig,
        platform: Arc<dyn WorkerPlatform>,
    ) -> Result<Arc<Self>, SearchError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            workers: Arc::new(WorkerManager::new(platform)),
            pending: PendingResolutions::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            next_job: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workers(&self) -> &Arc<WorkerManager> {
        &self.workers
    }

    pub fn pending(&self) -> &PendingResolutions {
        &self.pending
    }

    /// Allocate the next job id. Ids are unique for the context's lifetime.
    pub fn next_job_id(&self) -> JobId {
        JobId(self.next_job.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start the orphan sweeper and, if given, the router draining `push`.
    pub fn start(self: &Arc<Self>, push: Option<PushReceiver>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(
            self.workers
                .spawn_sweeper(self.config.sweep_interval(), self.cancel.child_token()),
        );
        if let Some(push) = push {
            tasks.push(spawn_push_router(
                Arc::downgrade(self),
                push,
                self.cancel.child_token(),
            ));
        }
        info!(
            sweep_interval_seconds = self.config.sweep_interval_seconds,
            "orchestrator started"
        );
    }

    /// Hand a pushed message to the job waiting on `sender`.
    ///
    /// Returns `true` if the push resolved the job, `false` if the job had
    /// already been resolved by the other channel.
    ///
    /// # Errors
    ///
    /// - [`SearchError::Extraction`] if the message is not a results push.
    /// - [`SearchError::Correlation`] if no job is waiting on `sender`, or
    ///   the message names a different site than the job searches.
    pub fn deliver_push(
        &self,
        sender: WorkerId,
        message: serde_json::Value,
    ) -> Result<bool, SearchError> {
        let push = PushNotification::parse(message)?;
        let resolver = self.pending.get(sender).ok_or_else(|| {
            SearchError::Correlation(format!("no pending job for {sender}"))
        })?;
        if push.site() != Some(resolver.site()) {
            return Err(SearchError::Correlation(format!(
                "{sender} searches {} but pushed {}",
                resolver.site().name(),
                push.message_type
            )));
        }

        let count = push.results.len();
        let delivered = resolver.resolve(Resolution::Pushed(push.results));
        if delivered {
            debug!(worker = %sender, count, "push resolved job");
        } else {
            debug!(worker = %sender, "late push ignored");
        }
        Ok(delivered)
    }

    /// Cancel background tasks, force-destroy every worker and forget
    /// pending resolutions. Returns the number of workers torn down.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        let destroyed = self.workers.cleanup_all().await;
        self.pending.clear();
        info!(destroyed, "orchestrator shut down");
        destroyed
    }
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn spawn_push_router(
    ctx: Weak<OrchestratorContext>,
    mut push: PushReceiver,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = push.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Some(ctx) = ctx.upgrade() else { break };
            if let Err(err) = ctx.deliver_push(envelope.sender, envelope.message) {
                warn!(worker = %envelope.sender, error = %err, "push discarded");
            }
        }
        debug!("push router stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::resolver::Resolver;
    use crate::testing::ScriptedPlatform;
    use crate::types::Site;
    use crate::worker::{push_channel, PushEnvelope};
    use serde_json::json;

    fn context() -> Arc<OrchestratorContext> {
        OrchestratorContext::new(EngineConfig::default(), Arc::new(ScriptedPlatform::new()))
            .expect("context")
    }

    fn vinted_push() -> serde_json::Value {
        json!({"type": "VINTED_RESULTS", "results": [{"title": "Veste", "url": "https://www.vinted.fr/items/1"}]})
    }

    #[test]
    fn invalid_config_rejected() {
        let config = EngineConfig {
            job_timeout_seconds: 0,
            ..Default::default()
        };
        let err = OrchestratorContext::new(config, Arc::new(ScriptedPlatform::new())).unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn job_ids_are_sequential() {
        let ctx = context();
        assert_eq!(ctx.next_job_id(), JobId(1));
        assert_eq!(ctx.next_job_id(), JobId(2));
    }

    #[tokio::test]
    async fn push_resolves_pending_job_once() {
        let ctx = context();
        let (resolver, rx) = Resolver::new(WorkerId(1), Site::Vinted);
        ctx.pending().register(resolver).expect("register");

        assert!(ctx.deliver_push(WorkerId(1), vinted_push()).expect("deliver"));
        assert!(!ctx.deliver_push(WorkerId(1), vinted_push()).expect("late push"));

        let Ok(Resolution::Pushed(items)) = rx.await else {
            panic!("expected push resolution");
        };
        assert_eq!(items[0].title, "Veste");
    }

    #[test]
    fn push_for_unknown_worker_is_correlation_error() {
        let ctx = context();
        let err = ctx.deliver_push(WorkerId(9), vinted_push()).unwrap_err();
        assert!(matches!(err, SearchError::Correlation(_)));
    }

    #[test]
    fn push_for_other_site_is_rejected() {
        let ctx = context();
        let (resolver, _rx) = Resolver::new(WorkerId(1), Site::Ebay);
        ctx.pending().register(Arc::clone(&resolver)).expect("register");

        let err = ctx.deliver_push(WorkerId(1), vinted_push()).unwrap_err();
        assert!(matches!(err, SearchError::Correlation(_)));
        assert!(!resolver.is_resolved());
    }

    #[test]
    fn malformed_push_is_extraction_error() {
        let ctx = context();
        let err = ctx.deliver_push(WorkerId(1), json!({"results": 3})).unwrap_err();
        assert!(matches!(err, SearchError::Extraction(_)));
    }

    #[tokio::test]
    async fn router_delivers_from_channel() {
        let ctx = context();
        let (tx, rx) = push_channel();
        ctx.start(Some(rx));

        let (resolver, resolved) = Resolver::new(WorkerId(3), Site::Vinted);
        ctx.pending().register(resolver).expect("register");
        tx.send(PushEnvelope {
            sender: WorkerId(3),
            message: vinted_push(),
        })
        .expect("send");

        let resolution = tokio::time::timeout(std::time::Duration::from_secs(5), resolved)
            .await
            .expect("in time")
            .expect("delivered");
        assert_eq!(resolution.label(), "push");
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_destroys_remaining_workers() {
        let platform = Arc::new(ScriptedPlatform::new());
        let ctx = OrchestratorContext::new(
            EngineConfig::default(),
            Arc::clone(&platform) as Arc<dyn WorkerPlatform>,
        )
        .expect("context");
        ctx.start(None);
        ctx.workers()
            .acquire(JobId(1), "https://www.amazon.fr/s?k=drill")
            .await
            .expect("acquire");

        assert_eq!(ctx.shutdown().await, 1);
        assert!(ctx.is_shut_down());
        assert_eq!(platform.live_count(), 0);
        assert_eq!(ctx.workers().live_count(), 0);
    }
}
