//! Worker lifecycle: acquire, release, orphan sweep and global cleanup.
//!
//! Every worker created through [`WorkerManager::acquire`] is registered in
//! the [`ProcessRegistry`] and leaves it through exactly one of:
//!
//! - [`WorkerManager::release`] by its owning job,
//! - [`WorkerManager::sweep_orphans`] when the resource vanished out of band,
//! - [`WorkerManager::cleanup_all`] on engine shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::extract::ExtractRequest;
use crate::types::JobId;

use super::registry::{ProcessRegistry, WorkerRecord};
use super::{LoadStatus, WorkerHandle, WorkerId, WorkerPlatform};

/// Creates, tracks and tears down worker resources on a [`WorkerPlatform`].
pub struct WorkerManager {
    platform: Arc<dyn WorkerPlatform>,
    registry: ProcessRegistry,
    next_id: AtomicU64,
}

impl WorkerManager {
    pub fn new(platform: Arc<dyn WorkerPlatform>) -> Self {
        Self {
            platform,
            registry: ProcessRegistry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Number of registered (live) workers.
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    pub fn records(&self) -> Vec<WorkerRecord> {
        self.registry.records()
    }

    /// Create a worker navigated to `target_url` and register it for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ResourceCreation`] if the platform cannot
    /// create the resource. Nothing is registered in that case.
    pub async fn acquire(&self, owner: JobId, target_url: &str) -> Result<WorkerHandle, SearchError> {
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.platform
            .create(id, target_url)
            .await
            .map_err(|e| match e {
                SearchError::ResourceCreation(_) => e,
                other => SearchError::ResourceCreation(other.to_string()),
            })?;

        let handle = WorkerHandle::new(id, owner, target_url);
        if let Err(err) = self.registry.insert(handle.record()) {
            // Ids are never reused, so this only happens on a broken platform.
            let _ = self.platform.destroy(id).await;
            return Err(SearchError::ResourceCreation(err.to_string()));
        }

        debug!(worker = %id, job = %owner, "worker acquired");
        tracing::trace!(worker = %id, url = target_url, "worker target");
        Ok(handle)
    }

    /// Release a worker. Idempotent.
    ///
    /// Removes the handle from the registry and destroys the resource if the
    /// platform still reports it alive. Returns `true` if the handle was
    /// still registered.
    pub async fn release(&self, handle: &WorkerHandle) -> bool {
        let id = handle.id();
        let was_registered = self.registry.remove(id).is_some();

        if self.platform.exists(id).await {
            if let Err(err) = self.platform.destroy(id).await {
                warn!(worker = %id, error = %err, "failed to destroy worker");
            }
        }

        if was_registered {
            debug!(worker = %id, job = %handle.owner(), "worker released");
        }
        was_registered
    }

    pub async fn load_status(&self, id: WorkerId) -> Result<LoadStatus, SearchError> {
        self.platform.load_status(id).await
    }

    pub async fn extract(
        &self,
        id: WorkerId,
        request: &ExtractRequest,
    ) -> Result<serde_json::Value, SearchError> {
        self.platform.extract(id, request).await
    }

    /// Drop registry entries whose resource no longer exists.
    ///
    /// Best effort: a live resource is never destroyed here. Returns the
    /// number of entries removed.
    pub async fn sweep_orphans(&self) -> usize {
        let mut removed = 0;
        for id in self.registry.ids() {
            if !self.platform.exists(id).await && self.registry.remove(id).is_some() {
                debug!(worker = %id, "orphaned worker removed from registry");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, remaining = self.registry.len(), "orphan sweep finished");
        }
        removed
    }

    /// Force-destroy every registered worker regardless of job state.
    ///
    /// Returns the number of workers torn down.
    pub async fn cleanup_all(&self) -> usize {
        let records = self.registry.drain();
        let count = records.len();
        for record in records {
            if let Err(err) = self.platform.destroy(record.id).await {
                warn!(worker = %record.id, error = %err, "failed to destroy worker during cleanup");
            }
        }
        if count > 0 {
            info!(count, "all workers cleaned up");
        }
        count
    }

    /// Run [`sweep_orphans`](Self::sweep_orphans) every `interval` until `cancel` fires.
    ///
    /// ```rust,ignore
    /// let sweeper = manager.spawn_sweeper(Duration::from_secs(120), cancel.child_token());
    /// ```
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            debug!(?interval, "orphan sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("orphan sweeper cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        manager.sweep_orphans().await;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("live", &self.registry.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
