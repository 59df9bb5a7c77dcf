//! Host command channel and router.
//!
//! Cheap commands are answered inline by the server loop. Searches run on
//! their own tasks so a slow marketplace never delays `host.ping` or
//! `runtime.status`.

use std::sync::Arc;

use bazaar_engine::SearchMessage;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::error::{BazaarError, Result};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_SEARCH_COMPLETED, EVENT_SEARCH_STARTED, EVENT_VERSION,
    EventEnvelope, ResponseEnvelope,
};
use crate::host::handler::SearchHandler;

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            BazaarError::Protocol(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                BazaarError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| BazaarError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Routes envelopes to a [`SearchHandler`]. Cloned into search tasks.
pub struct CommandRouter<H: SearchHandler> {
    handler: Arc<H>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl<H: SearchHandler> Clone for CommandRouter<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<H: SearchHandler> CommandRouter<H> {
    /// Route a command envelope to the handler.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "contract_version": EVENT_VERSION,
                    "channel": "host_command_v1",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::Search => self.handle_search(envelope).await,
            CommandName::RuntimeStatus => {
                let status = serde_json::to_value(self.handler.runtime_status()).map_err(|e| {
                    BazaarError::Protocol(format!("failed to encode runtime status: {e}"))
                })?;
                Ok(ResponseEnvelope::ok(envelope.request_id.clone(), status))
            }
            CommandName::RuntimeSweep => {
                let removed = self.handler.sweep().await?;
                Ok(ResponseEnvelope::ok(
                    envelope.request_id.clone(),
                    serde_json::json!({"removed": removed}),
                ))
            }
            CommandName::RuntimeStop => {
                let destroyed = self.handler.stop().await?;
                Ok(ResponseEnvelope::ok(
                    envelope.request_id.clone(),
                    serde_json::json!({"stopped": true, "destroyed": destroyed}),
                ))
            }
        }
    }

    async fn handle_search(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let message = SearchMessage::parse(envelope.payload.clone())?;
        let SearchMessage::Search(request) = &message;
        let query = request.query.clone();

        self.emit_event(
            EVENT_SEARCH_STARTED,
            serde_json::json!({
                "request_id": envelope.request_id,
                "query": query,
            }),
        );

        let response = self.handler.search(message).await?;
        let (results, completed_sites) = match response.response() {
            Some(aggregated) => (
                aggregated.results.len(),
                aggregated.completed_sites.clone(),
            ),
            None => (0, Vec::new()),
        };

        self.emit_event(
            EVENT_SEARCH_COMPLETED,
            serde_json::json!({
                "request_id": envelope.request_id,
                "success": response.is_success(),
                "results": results,
                "completed_sites": completed_sites,
            }),
        );

        let payload = serde_json::to_value(&response)
            .map_err(|e| BazaarError::Protocol(format!("failed to encode search response: {e}")))?;
        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), payload))
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

pub struct HostCommandServer<H: SearchHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    router: CommandRouter<H>,
}

#[must_use]
pub fn command_channel<H: SearchHandler>(
    request_capacity: usize,
    event_capacity: usize,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            router: CommandRouter {
                handler: Arc::new(handler),
                event_tx,
            },
        },
    )
}

impl<H: SearchHandler> HostCommandServer<H> {
    /// Serve requests until every client is dropped, then wait for
    /// searches still in flight.
    pub async fn run(mut self) {
        let mut searches = JoinSet::new();
        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(request) => self.dispatch(request, &mut searches).await,
                    None => break,
                },
                Some(_) = searches.join_next(), if !searches.is_empty() => {}
            }
        }
        while searches.join_next().await.is_some() {}
        tracing::debug!("host command server stopped");
    }

    async fn dispatch(&self, request: HostCommandRequest, searches: &mut JoinSet<()>) {
        if request.envelope.command == CommandName::Search {
            let router = self.router.clone();
            searches.spawn(async move {
                let response = router.route(&request.envelope).await;
                let _ = request.response_tx.send(response);
            });
        } else {
            let response = self.router.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope inline.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        self.router.route(envelope).await
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<H> {
        &self.router.handler
    }
}
