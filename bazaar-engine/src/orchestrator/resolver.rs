//! First-wins resolution shared by the push and pull channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::SearchError;
use crate::types::{ResultItem, Site};
use crate::worker::WorkerId;

/// How a correlation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The collaborator pushed results unprompted.
    Pushed(Vec<ResultItem>),
    /// An `EXTRACT` request was answered.
    Pulled(Vec<ResultItem>),
    /// Every extraction attempt failed.
    ExtractionFailed(String),
    /// Neither channel resolved before the job deadline.
    TimedOut,
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pushed(_) => "push",
            Self::Pulled(_) => "pull",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::TimedOut => "timeout",
        }
    }
}

/// One-shot completion point of a job.
///
/// The first [`resolve`](Self::resolve) wins; every later call is a no-op
/// that returns `false`, whichever channel it comes from.
#[derive(Debug)]
pub struct Resolver {
    worker: WorkerId,
    site: Site,
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl Resolver {
    pub fn new(worker: WorkerId, site: Site) -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Arc::new(Self {
            worker,
            site,
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (resolver, rx)
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Deliver `resolution` if nothing has been delivered yet.
    pub fn resolve(&self, resolution: Resolution) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            // A dropped receiver means the job already finished; the flag
            // still records that this call won.
            Some(tx) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }
}

/// Resolvers of in-flight jobs, keyed by the worker serving each job.
#[derive(Debug, Default)]
pub struct PendingResolutions {
    map: Mutex<HashMap<WorkerId, Arc<Resolver>>>,
}

impl PendingResolutions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, Arc<Resolver>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Errors
    ///
    /// Returns [`SearchError::Correlation`] if the worker already has a
    /// pending resolver.
    pub fn register(&self, resolver: Arc<Resolver>) -> Result<(), SearchError> {
        let mut map = self.lock();
        let worker = resolver.worker();
        if map.contains_key(&worker) {
            return Err(SearchError::Correlation(format!(
                "{worker} already has a pending resolution"
            )));
        }
        map.insert(worker, resolver);
        Ok(())
    }

    pub fn get(&self, worker: WorkerId) -> Option<Arc<Resolver>> {
        self.lock().get(&worker).cloned()
    }

    pub fn remove(&self, worker: WorkerId) -> Option<Arc<Resolver>> {
        self.lock().remove(&worker)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
