//! Ephemeral worker resources.
//!
//! A worker is a background rendering context pointed at one marketplace
//! search page. The [`WorkerPlatform`] trait is the seam to whatever
//! actually hosts those contexts; [`WorkerManager`] owns their lifecycle
//! and the [`ProcessRegistry`] of live handles.

pub mod http;
pub mod manager;
pub mod registry;

pub use http::HttpWorkerPlatform;
pub use manager::WorkerManager;
pub use registry::{ProcessRegistry, WorkerRecord};

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SearchError;
use crate::extract::ExtractRequest;
use crate::types::JobId;

/// Identifier of one worker resource, unique for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Exclusive reference to a live worker resource.
///
/// Deliberately not `Clone`: exactly one job owns a handle until it is
/// released through [`WorkerManager::release`].
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    owner: JobId,
    created_at: Instant,
    target_url: String,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId, owner: JobId, target_url: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            created_at: Instant::now(),
            target_url: target_url.into(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn owner(&self) -> JobId {
        self.owner
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub(crate) fn record(&self) -> WorkerRecord {
        WorkerRecord {
            id: self.id,
            owner: self.owner,
            created_at: self.created_at,
            target_url: self.target_url.clone(),
        }
    }
}

/// Page load progress reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Complete,
}

/// Results pushed by a worker's collaborator, tagged with the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEnvelope {
    pub sender: WorkerId,
    pub message: serde_json::Value,
}

/// Sending half handed to a platform so its workers can push results.
pub type PushSender = mpsc::UnboundedSender<PushEnvelope>;

/// Receiving half drained by the orchestrator's push router.
pub type PushReceiver = mpsc::UnboundedReceiver<PushEnvelope>;

/// Create the channel that carries unsolicited pushes into the engine.
#[must_use]
pub fn push_channel() -> (PushSender, PushReceiver) {
    mpsc::unbounded_channel()
}

/// Host of worker resources.
///
/// All methods take the [`WorkerId`] allocated by the [`WorkerManager`];
/// implementations keep their own table of live contexts.
#[async_trait]
pub trait WorkerPlatform: Send + Sync {
    /// Create a background (non-focus-stealing) context navigated to `target_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::ResourceCreation`] if the context cannot be created.
    async fn create(&self, id: WorkerId, target_url: &str) -> Result<(), SearchError>;

    /// Whether the underlying resource still exists.
    async fn exists(&self, id: WorkerId) -> bool;

    /// Destroy the resource. Destroying an unknown worker is not an error.
    async fn destroy(&self, id: WorkerId) -> Result<(), SearchError>;

    /// Current page load status.
    async fn load_status(&self, id: WorkerId) -> Result<LoadStatus, SearchError>;

    /// Ask the worker's collaborator for its listings and return the raw reply.
    async fn extract(
        &self,
        id: WorkerId,
        request: &ExtractRequest,
    ) -> Result<serde_json::Value, SearchError>;
}
