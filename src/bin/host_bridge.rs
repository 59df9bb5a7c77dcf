//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them to the search engine, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr (and optionally a log
//! file) so that stdout remains a clean JSON protocol channel.

use bazaar::config::BazaarConfig;
use bazaar::host::handler::EngineHandler;
use bazaar::host::stdio::run_stdio_bridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(BazaarConfig::default_config_path);
    let config = BazaarConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", config_path.display()))?;

    let _log_guard = bazaar::logging::init(&config.logging)?;
    tracing::info!(config = %config_path.display(), "bazaar-host starting");

    let handler = EngineHandler::from_config(&config)?;
    let ctx = std::sync::Arc::clone(handler.context());

    let result = run_stdio_bridge(handler).await;

    // EOF without runtime.stop still tears every worker down.
    if !ctx.is_shut_down() {
        ctx.shutdown().await;
    }

    result.map_err(|e| {
        tracing::error!(error = %e, "bazaar-host exited with error");
        anyhow::anyhow!("bazaar-host failed: {e}")
    })?;

    tracing::info!("bazaar-host shut down cleanly");
    Ok(())
}
