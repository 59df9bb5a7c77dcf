//! Scripted worker platform for tests.
//!
//! [`ScriptedPlatform`] plays back a [`SiteScript`] per marketplace: how
//! long the page takes to load, how many extraction attempts fail, what
//! the collaborator replies and whether it pushes. It records every
//! create and destroy so tests can assert that no worker leaks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SearchError;
use crate::extract::{ExtractReply, ExtractRequest, PushNotification};
use crate::types::{ResultItem, Site};
use crate::worker::{LoadStatus, PushEnvelope, PushSender, WorkerId, WorkerPlatform};

/// Behaviour of every worker pointed at one site.
#[derive(Debug, Clone)]
pub struct SiteScript {
    pub fail_create: bool,
    /// Creation takes this long. `None` creates at once.
    pub create_delay: Option<Duration>,
    /// Creation never completes.
    pub hang_create: bool,
    /// Load-status polls answered `Loading` before `Complete`. `None` never completes.
    pub polls_until_loaded: Option<u32>,
    /// Extraction attempts answered with a failure reply before succeeding.
    pub failed_extracts: u32,
    /// Answer extraction with a payload that is not a reply.
    pub malformed_reply: bool,
    pub results: Vec<ResultItem>,
    /// Push `results` this long after creation.
    pub push_after: Option<Duration>,
}

impl Default for SiteScript {
    fn default() -> Self {
        Self {
            fail_create: false,
            create_delay: None,
            hang_create: false,
            polls_until_loaded: Some(0),
            failed_extracts: 0,
            malformed_reply: false,
            results: Vec::new(),
            push_after: None,
        }
    }
}

impl SiteScript {
    /// Loads at once and answers the first extraction with `results`.
    pub fn pulls(results: Vec<ResultItem>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    /// Never loads; pushes `results` after `delay`.
    pub fn pushes(delay: Duration, results: Vec<ResultItem>) -> Self {
        Self {
            polls_until_loaded: None,
            results,
            push_after: Some(delay),
            ..Self::default()
        }
    }

    /// Never loads and never pushes.
    pub fn silent() -> Self {
        Self {
            polls_until_loaded: None,
            ..Self::default()
        }
    }

    pub fn failing_creation() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// Creation never returns.
    pub fn hanging_creation() -> Self {
        Self {
            hang_create: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn creating_after(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn loading_after(mut self, polls: u32) -> Self {
        self.polls_until_loaded = Some(polls);
        self
    }

    #[must_use]
    pub fn failing_extracts(mut self, attempts: u32) -> Self {
        self.failed_extracts = attempts;
        self
    }

    #[must_use]
    pub fn malformed(mut self) -> Self {
        self.malformed_reply = true;
        self
    }

    #[must_use]
    pub fn with_push(mut self, delay: Duration) -> Self {
        self.push_after = Some(delay);
        self
    }
}

#[derive(Debug)]
struct ScriptedWorker {
    script: SiteScript,
    polls: u32,
    extracts: u32,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<Site, SiteScript>,
    /// Scripts for target URLs containing a needle; checked before `scripts`.
    url_scripts: Vec<(String, SiteScript)>,
    live: HashMap<WorkerId, ScriptedWorker>,
    created: Vec<(WorkerId, String)>,
    destroy_calls: HashMap<WorkerId, u32>,
    extract_calls: u32,
}

/// In-memory [`WorkerPlatform`] driven by per-site scripts.
#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    state: Mutex<State>,
    push: Option<PushSender>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver scripted pushes into `push`.
    #[must_use]
    pub fn with_push(mut self, push: PushSender) -> Self {
        self.push = Some(push);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the script of `site`. Unscripted sites load at once and reply empty.
    pub fn script(&self, site: Site, script: SiteScript) {
        self.state().scripts.insert(site, script);
    }

    /// Set the script of workers whose target URL contains `needle`.
    pub fn script_url(&self, needle: impl Into<String>, script: SiteScript) {
        self.state().url_scripts.push((needle.into(), script));
    }

    /// Make a worker disappear without going through the engine.
    pub fn vanish(&self, id: WorkerId) {
        self.state().live.remove(&id);
    }

    pub fn is_live(&self, id: WorkerId) -> bool {
        self.state().live.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    pub fn created_count(&self) -> usize {
        self.state().created.len()
    }

    /// Target URLs in creation order.
    pub fn created_urls(&self) -> Vec<String> {
        self.state().created.iter().map(|(_, url)| url.clone()).collect()
    }

    pub fn destroy_calls(&self, id: WorkerId) -> u32 {
        self.state().destroy_calls.get(&id).copied().unwrap_or(0)
    }

    pub fn extract_calls(&self) -> u32 {
        self.state().extract_calls
    }
}

#[async_trait]
impl WorkerPlatform for ScriptedPlatform {
    async fn create(&self, id: WorkerId, target_url: &str) -> Result<(), SearchError> {
        let site = Site::from_url(target_url).ok_or_else(|| {
            SearchError::ResourceCreation(format!("no marketplace serves {target_url}"))
        })?;

        let script = {
            let state = self.state();
            let script = state
                .url_scripts
                .iter()
                .find(|(needle, _)| target_url.contains(needle.as_str()))
                .map(|(_, script)| script.clone())
                .or_else(|| state.scripts.get(&site).cloned())
                .unwrap_or_default();
            script
        };
        if script.hang_create {
            return std::future::pending().await;
        }
        if let Some(delay) = script.create_delay {
            tokio::time::sleep(delay).await;
        }
        if script.fail_create {
            return Err(SearchError::ResourceCreation(format!(
                "{} refused to open",
                site.name()
            )));
        }

        {
            let mut state = self.state();
            state.created.push((id, target_url.to_owned()));
            state.live.insert(
                id,
                ScriptedWorker {
                    script: script.clone(),
                    polls: 0,
                    extracts: 0,
                },
            );
        }

        if let (Some(delay), Some(tx)) = (script.push_after, self.push.clone()) {
            let message = PushNotification::new(site, script.results).to_value();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(PushEnvelope { sender: id, message });
            });
        }
        Ok(())
    }

    async fn exists(&self, id: WorkerId) -> bool {
        self.is_live(id)
    }

    async fn destroy(&self, id: WorkerId) -> Result<(), SearchError> {
        let mut state = self.state();
        *state.destroy_calls.entry(id).or_insert(0) += 1;
        state.live.remove(&id);
        Ok(())
    }

    async fn load_status(&self, id: WorkerId) -> Result<LoadStatus, SearchError> {
        let mut state = self.state();
        let worker = state
            .live
            .get_mut(&id)
            .ok_or_else(|| SearchError::Extraction(format!("unknown {id}")))?;

        let status = match worker.script.polls_until_loaded {
            Some(polls) if worker.polls >= polls => LoadStatus::Complete,
            _ => LoadStatus::Loading,
        };
        worker.polls += 1;
        Ok(status)
    }

    async fn extract(
        &self,
        id: WorkerId,
        _request: &ExtractRequest,
    ) -> Result<serde_json::Value, SearchError> {
        let mut state = self.state();
        state.extract_calls += 1;
        let worker = state
            .live
            .get_mut(&id)
            .ok_or_else(|| SearchError::Extraction(format!("unknown {id}")))?;
        worker.extracts += 1;

        if worker.script.malformed_reply {
            return Ok(serde_json::json!({"status": "ok"}));
        }
        let reply = if worker.extracts <= worker.script.failed_extracts {
            ExtractReply::Failure("listing grid not rendered".into())
        } else {
            ExtractReply::Success(worker.script.results.clone())
        };
        Ok(reply.to_value())
    }
}
