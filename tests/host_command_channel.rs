#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use bazaar::BazaarError;
use bazaar::bazaar_engine::testing::{ScriptedPlatform, SiteScript};
use bazaar::bazaar_engine::types::JobId;
use bazaar::bazaar_engine::{
    EngineConfig, OrchestratorContext, ResultItem, SearchError, Site, WorkerPlatform,
};
use bazaar::host::channel::{HostCommandClient, command_channel};
use bazaar::host::contract::{
    CommandEnvelope, CommandName, EVENT_SEARCH_COMPLETED, EVENT_SEARCH_STARTED, EVENT_VERSION,
};
use bazaar::host::handler::EngineHandler;
use bazaar::host::stdio::run_bridge;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

fn listing(n: usize) -> ResultItem {
    ResultItem {
        title: format!("veste {n}"),
        url: format!("https://www.vinted.fr/items/{n}"),
        price: 20.0 + n as f64,
        ..ResultItem::default()
    }
}

fn engine(script: impl FnOnce(&ScriptedPlatform)) -> (Arc<ScriptedPlatform>, EngineHandler) {
    let platform = Arc::new(ScriptedPlatform::new());
    script(platform.as_ref());
    let ctx = OrchestratorContext::new(
        EngineConfig::default(),
        Arc::clone(&platform) as Arc<dyn WorkerPlatform>,
    )
    .expect("context");
    ctx.start(None);
    (platform, EngineHandler::new(ctx))
}

fn serve(handler: EngineHandler) -> HostCommandClient {
    let (client, server) = command_channel(8, 32, handler);
    tokio::spawn(server.run());
    client
}

fn vinted_search() -> Value {
    json!({"type": "SEARCH", "query": "veste", "criteria": {"sites": ["vinted"]}})
}

#[tokio::test]
async fn ping_and_version() {
    let (_, handler) = engine(|_| {});
    let client = serve(handler);

    let pong = client
        .send(CommandEnvelope::new("p1", CommandName::HostPing, json!({})))
        .await
        .expect("ping");
    assert!(pong.ok);
    assert_eq!(pong.request_id, "p1");
    assert_eq!(pong.payload, json!({"pong": true}));

    let version = client
        .send(CommandEnvelope::new("v1", CommandName::HostVersion, Value::Null))
        .await
        .expect("version");
    assert_eq!(version.payload["contract_version"], json!(EVENT_VERSION));
    assert!(version.payload["version"].is_string());
}

#[tokio::test(start_paused = true)]
async fn search_returns_engine_response_and_events() {
    let (platform, handler) = engine(|p| {
        p.script(Site::Vinted, SiteScript::pulls(vec![listing(1), listing(2)]));
    });
    let client = serve(handler);
    let mut events = client.subscribe_events();

    let response = client
        .send(CommandEnvelope::new("s1", CommandName::Search, vinted_search()))
        .await
        .expect("search");

    assert!(response.ok);
    assert_eq!(response.request_id, "s1");
    assert_eq!(response.payload["success"], json!(true));
    assert_eq!(response.payload["completedSites"], json!(["vinted"]));
    assert_eq!(response.payload["results"].as_array().map(Vec::len), Some(2));
    // Vinted plus the reference site.
    assert_eq!(platform.created_count(), 2);

    let started = events.recv().await.expect("started event");
    assert_eq!(started.event, EVENT_SEARCH_STARTED);
    assert_eq!(started.payload["request_id"], json!("s1"));
    assert_eq!(started.payload["query"], json!("veste"));

    let completed = events.recv().await.expect("completed event");
    assert_eq!(completed.event, EVENT_SEARCH_COMPLETED);
    assert_eq!(completed.payload["results"], json!(2));
    assert_eq!(completed.payload["completed_sites"], json!(["vinted"]));
    assert_ne!(started.event_id, completed.event_id);
}

#[tokio::test(start_paused = true)]
async fn slow_search_does_not_block_other_commands() {
    let (_, handler) = engine(|p| {
        for &site in Site::all() {
            p.script(site, SiteScript::silent());
        }
    });
    let client = serve(handler);
    let started = Instant::now();

    let search_client = client.clone();
    let search = tokio::spawn(async move {
        let payload = json!({"type": "SEARCH", "query": "perceuse"});
        search_client
            .send(CommandEnvelope::new("s1", CommandName::Search, payload))
            .await
    });
    tokio::task::yield_now().await;

    let status = client
        .send(CommandEnvelope::new("st", CommandName::RuntimeStatus, json!({})))
        .await
        .expect("status");
    assert!(status.ok);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!search.is_finished());

    let response = search.await.expect("join").expect("search");
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(response.payload["success"], json!(true));
    assert_eq!(response.payload["completedSites"], json!([]));
}

#[tokio::test]
async fn malformed_search_payload_is_engine_parse_error() {
    let (platform, handler) = engine(|_| {});
    let client = serve(handler);

    let err = client
        .send(CommandEnvelope::new("s1", CommandName::Search, json!({"query": 3})))
        .await
        .unwrap_err();

    assert!(matches!(err, BazaarError::Engine(SearchError::Parse(_))), "{err}");
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test]
async fn blank_query_is_unsuccessful_search() {
    let (_, handler) = engine(|_| {});
    let client = serve(handler);

    let payload = json!({"type": "SEARCH", "query": " "});
    let response = client
        .send(CommandEnvelope::new("s1", CommandName::Search, payload))
        .await
        .expect("search");

    assert!(response.ok, "the command ran; the search itself failed");
    assert_eq!(response.payload["success"], json!(false));
    assert!(response.payload["error"].is_string());
}

#[tokio::test]
async fn invalid_envelope_rejected_before_dispatch() {
    let (_, handler) = engine(|_| {});
    let client = serve(handler);

    let mut envelope = CommandEnvelope::new("p1", CommandName::HostPing, json!({}));
    envelope.v = EVENT_VERSION + 1;
    let err = client.send(envelope).await.unwrap_err();

    assert!(matches!(err, BazaarError::Protocol(_)));
}

#[tokio::test]
async fn sweep_drops_vanished_workers() {
    let (platform, handler) = engine(|_| {});
    let ctx = Arc::clone(handler.context());
    let client = serve(handler);

    let handle = ctx
        .workers()
        .acquire(JobId(42), "https://www.vinted.fr/catalog?search_text=veste")
        .await
        .expect("acquire");
    platform.vanish(handle.id());

    let status = client
        .send(CommandEnvelope::new("st1", CommandName::RuntimeStatus, json!({})))
        .await
        .expect("status");
    assert_eq!(status.payload["live_workers"], json!(1));

    let sweep = client
        .send(CommandEnvelope::new("sw", CommandName::RuntimeSweep, json!({})))
        .await
        .expect("sweep");
    assert_eq!(sweep.payload, json!({"removed": 1}));

    let status = client
        .send(CommandEnvelope::new("st2", CommandName::RuntimeStatus, json!({})))
        .await
        .expect("status");
    assert_eq!(
        status.payload,
        json!({"live_workers": 0, "pending_resolutions": 0, "stopped": false})
    );
}

#[tokio::test]
async fn stop_destroys_workers_and_refuses_searches() {
    let (platform, handler) = engine(|_| {});
    let ctx = Arc::clone(handler.context());
    let client = serve(handler);
    ctx.workers()
        .acquire(JobId(7), "https://www.ebay.fr/sch/i.html?_nkw=drill")
        .await
        .expect("acquire");

    let stop = client
        .send(CommandEnvelope::new("x", CommandName::RuntimeStop, json!({})))
        .await
        .expect("stop");
    assert_eq!(stop.payload, json!({"stopped": true, "destroyed": 1}));
    assert_eq!(platform.live_count(), 0);

    let err = client
        .send(CommandEnvelope::new("s1", CommandName::Search, vinted_search()))
        .await
        .unwrap_err();
    assert!(matches!(err, BazaarError::Channel(_)));
}

#[tokio::test(start_paused = true)]
async fn stdio_bridge_answers_every_line() {
    let (_, handler) = engine(|p| {
        p.script(Site::Vinted, SiteScript::pulls(vec![listing(1)]));
    });
    let input = [
        json!({"v": 1, "request_id": "p1", "command": "host.ping", "payload": {}}).to_string(),
        "{not json".to_owned(),
        String::new(),
        json!({"v": 1, "request_id": "s1", "command": "search", "payload": vinted_search()})
            .to_string(),
    ]
    .join("\n");
    let (writer, mut output) = tokio::io::duplex(1 << 20);

    run_bridge(handler, input.as_bytes(), writer)
        .await
        .expect("bridge");

    let mut raw = String::new();
    output.read_to_string(&mut raw).await.expect("read output");
    let lines: Vec<Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();

    let response = |id: &str| {
        lines
            .iter()
            .find(|line| line["request_id"] == json!(id))
            .unwrap_or_else(|| panic!("no response for {id}: {raw}"))
    };
    assert_eq!(response("p1")["payload"], json!({"pong": true}));
    assert_eq!(response("parse-error")["ok"], json!(false));
    assert_eq!(response("s1")["payload"]["completedSites"], json!(["vinted"]));

    let events: Vec<&Value> = lines.iter().filter_map(|line| line.get("event")).collect();
    assert_eq!(
        events,
        vec![&json!(EVENT_SEARCH_STARTED), &json!(EVENT_SEARCH_COMPLETED)]
    );
    assert_eq!(lines.len(), 5);
}
