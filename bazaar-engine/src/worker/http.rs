//! HTTP-backed worker platform.
//!
//! Each worker is a background task that fetches one marketplace search
//! page with a shared [`reqwest::Client`] (browser-like headers, cookie
//! store, rotating User-Agent). Once the page is in memory the worker
//! reports `Complete`, answers `EXTRACT` requests through an
//! [`Extractor`], and pushes its listings unprompted when a push channel
//! is attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::SearchError;
use crate::extract::{ExtractReply, ExtractRequest, Extractor, PushNotification};
use crate::types::Site;

use super::{LoadStatus, PushEnvelope, PushSender, WorkerId, WorkerPlatform};

/// Realistic browser User-Agent strings, one picked per client.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Build a [`reqwest::Client`] for marketplace page loads.
///
/// Cookie store on, request timeout from config, brotli/gzip decoding,
/// and a random User-Agent unless one is configured.
///
/// # Errors
///
/// Returns [`SearchError::Http`] if the client cannot be constructed.
pub fn build_client(config: &EngineConfig) -> Result<reqwest::Client, SearchError> {
    let ua = match config.user_agent {
        Some(ref custom) => custom.clone(),
        None => random_user_agent().to_owned(),
    };

    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(config.request_timeout())
        .user_agent(ua)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| SearchError::Http(format!("failed to build HTTP client: {e}")))
}

/// Select a random User-Agent string from the rotation list.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[derive(Debug, Clone, PartialEq)]
enum PageState {
    Loading,
    Loaded { url: String, html: String },
    Failed(String),
}

type SharedPage = Arc<Mutex<PageState>>;

struct HttpWorker {
    site: Site,
    page: SharedPage,
    task: JoinHandle<()>,
}

fn lock_page(page: &SharedPage) -> MutexGuard<'_, PageState> {
    page.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`WorkerPlatform`] that loads pages over HTTP and extracts with an [`Extractor`].
pub struct HttpWorkerPlatform {
    client: reqwest::Client,
    extractor: Arc<dyn Extractor>,
    push: Option<PushSender>,
    workers: Mutex<HashMap<WorkerId, HttpWorker>>,
}

impl HttpWorkerPlatform {
    /// # Errors
    ///
    /// Returns [`SearchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig, extractor: Arc<dyn Extractor>) -> Result<Self, SearchError> {
        Ok(Self {
            client: build_client(config)?,
            extractor,
            push: None,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Push extracted listings into `push` as soon as each page loads.
    #[must_use]
    pub fn with_push(mut self, push: PushSender) -> Self {
        self.push = Some(push);
        self
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<WorkerId, HttpWorker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page_of(&self, id: WorkerId) -> Result<(Site, SharedPage), SearchError> {
        self.workers()
            .get(&id)
            .map(|w| (w.site, Arc::clone(&w.page)))
            .ok_or_else(|| SearchError::Extraction(format!("unknown {id}")))
    }
}

/// Load one page into `page`, then push its listings if anyone listens.
async fn load_page(
    id: WorkerId,
    site: Site,
    target_url: String,
    client: reqwest::Client,
    extractor: Arc<dyn Extractor>,
    page: SharedPage,
    push: Option<PushSender>,
) {
    let fetched = async {
        let response = client
            .get(&target_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("request failed: {e}"))?;
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {e}"))?;
        Ok::<_, String>((final_url, html))
    }
    .await;

    let (url, html) = match fetched {
        Ok(loaded) => loaded,
        Err(reason) => {
            warn!(worker = %id, site = site.name(), %reason, "page load failed");
            *lock_page(&page) = PageState::Failed(reason);
            return;
        }
    };
    debug!(worker = %id, site = site.name(), bytes = html.len(), "page loaded");

    let pushed = push.map(|tx| (tx, extractor.extract(site, &url, &html)));
    *lock_page(&page) = PageState::Loaded { url, html };

    if let Some((tx, Ok(results))) = pushed {
        if results.is_empty() {
            return;
        }
        let message = PushNotification::new(site, results).to_value();
        if tx.send(PushEnvelope { sender: id, message }).is_err() {
            debug!(worker = %id, "push channel closed");
        }
    }
}

/// Reply to an `EXTRACT` request given the worker's current page.
fn reply_for(state: &PageState, site: Site, extractor: &dyn Extractor) -> ExtractReply {
    match state {
        PageState::Loading => ExtractReply::Failure("page still loading".into()),
        PageState::Failed(reason) => ExtractReply::Failure(reason.clone()),
        PageState::Loaded { url, html } => match extractor.extract(site, url, html) {
            Ok(results) => ExtractReply::Success(results),
            Err(e) => ExtractReply::Failure(e.to_string()),
        },
    }
}

#[async_trait]
impl WorkerPlatform for HttpWorkerPlatform {
    async fn create(&self, id: WorkerId, target_url: &str) -> Result<(), SearchError> {
        let site = Site::from_url(target_url).ok_or_else(|| {
            SearchError::ResourceCreation(format!("no marketplace serves {target_url}"))
        })?;

        let page: SharedPage = Arc::new(Mutex::new(PageState::Loading));
        let task = tokio::spawn(load_page(
            id,
            site,
            target_url.to_owned(),
            self.client.clone(),
            Arc::clone(&self.extractor),
            Arc::clone(&page),
            self.push.clone(),
        ));

        if let Some(previous) = self.workers().insert(id, HttpWorker { site, page, task }) {
            previous.task.abort();
        }
        Ok(())
    }

    async fn exists(&self, id: WorkerId) -> bool {
        self.workers().contains_key(&id)
    }

    async fn destroy(&self, id: WorkerId) -> Result<(), SearchError> {
        if let Some(worker) = self.workers().remove(&id) {
            worker.task.abort();
        }
        Ok(())
    }

    async fn load_status(&self, id: WorkerId) -> Result<LoadStatus, SearchError> {
        let (_, page) = self.page_of(id)?;
        let status = match *lock_page(&page) {
            PageState::Loading => LoadStatus::Loading,
            PageState::Loaded { .. } | PageState::Failed(_) => LoadStatus::Complete,
        };
        Ok(status)
    }

    async fn extract(
        &self,
        id: WorkerId,
        request: &ExtractRequest,
    ) -> Result<serde_json::Value, SearchError> {
        let ExtractRequest::Extract = request;
        let (site, page) = self.page_of(id)?;
        let state = lock_page(&page).clone();
        Ok(reply_for(&state, site, self.extractor.as_ref()).to_value())
    }
}

impl Drop for HttpWorkerPlatform {
    fn drop(&mut self) {
        for (_, worker) in self.workers().drain() {
            worker.task.abort();
        }
    }
}

impl std::fmt::Debug for HttpWorkerPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWorkerPlatform")
            .field("workers", &self.workers().len())
            .field("push", &self.push.is_some())
            .finish_non_exhaustive()
    }
}
