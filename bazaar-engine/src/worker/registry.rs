//! Process-wide registry of live worker resources.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::SearchError;
use crate::types::JobId;

use super::WorkerId;

/// Registry entry for one live worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub owner: JobId,
    pub created_at: Instant,
    pub target_url: String,
}

/// Keyed set of every worker that has been created and not yet released.
///
/// Mutations are short critical sections under a [`Mutex`]; the lock is
/// never held across an `.await`.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    live: Mutex<HashMap<WorkerId, WorkerRecord>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerRecord>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Correlation`] if the id is already registered;
    /// a handle is never shared between two jobs.
    pub fn insert(&self, record: WorkerRecord) -> Result<(), SearchError> {
        let mut live = self.lock();
        if let Some(existing) = live.get(&record.id) {
            return Err(SearchError::Correlation(format!(
                "{} already registered to {}",
                record.id, existing.owner
            )));
        }
        live.insert(record.id, record);
        Ok(())
    }

    /// Remove a worker, returning its record if it was registered.
    pub fn remove(&self, id: WorkerId) -> Option<WorkerRecord> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of registered ids, in ascending order.
    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of registered records, in ascending id order.
    pub fn records(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self.lock().values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self.lock().drain().map(|(_, r)| r).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
