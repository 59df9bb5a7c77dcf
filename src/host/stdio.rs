//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the `HostCommandServer` router, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{BazaarError, Result};
use crate::host::channel::{HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use crate::host::handler::SearchHandler;

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// Default event broadcast channel capacity for the stdio bridge.
const EVENT_CAPACITY: usize = 128;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge on the process's stdin and stdout until stdin closes or
/// a `runtime.stop` command is received.
pub async fn run_stdio_bridge<H: SearchHandler>(handler: H) -> Result<()> {
    run_bridge(
        handler,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Run the bridge over any line reader and writer.
///
/// Three concurrent tasks operate in parallel:
///
/// 1. **Reader** -- reads newline-delimited JSON, dispatches each
///    `CommandEnvelope` and writes the `ResponseEnvelope`. Searches are
///    dispatched on their own tasks; their responses are written when
///    they complete, tagged with the request id.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope` messages.
/// 3. **Server** -- runs the `HostCommandServer` router loop.
///
/// On EOF or `runtime.stop` the reader waits for in-flight searches, the
/// server drains and the event forwarder writes what is left.
pub async fn run_bridge<H, R, W>(handler: H, reader: R, writer: W) -> Result<()>
where
    H: SearchHandler,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, EVENT_CAPACITY, handler);
    let writer = Arc::new(Mutex::new(BufWriter::new(writer)));

    let server_handle = tokio::spawn(async move {
        server.run().await;
    });

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        if let Err(e) = write_line(&event_writer, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(client, reader, Arc::clone(&writer)).await;

    // The reader dropped the client; once the server drains, the last
    // event sender goes away and the forwarder exits after flushing.
    let _ = server_handle.await;
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    client: HostCommandClient,
    mut reader: R,
    writer: SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut line = String::new();
    let mut in_flight = JoinSet::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| BazaarError::Channel(format!("failed to read command line: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse command envelope");
                tracing::trace!(raw_line = %trimmed, "unparseable command line");
                let error_response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &error_response).await?;
                continue;
            }
        };

        match envelope.command {
            CommandName::Search => {
                let client = client.clone();
                let writer = Arc::clone(&writer);
                in_flight.spawn(async move {
                    let response = dispatch(&client, envelope).await;
                    if let Err(e) = write_response(&writer, &response).await {
                        tracing::warn!(error = %e, "failed to write search response");
                    }
                });
            }
            CommandName::RuntimeStop => {
                let response = dispatch(&client, envelope).await;
                write_response(&writer, &response).await?;
                tracing::info!("runtime.stop received; shutting down bridge");
                break;
            }
            _ => {
                let response = dispatch(&client, envelope).await;
                write_response(&writer, &response).await?;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    Ok(())
}

async fn dispatch(client: &HostCommandClient, envelope: CommandEnvelope) -> ResponseEnvelope {
    let request_id = envelope.request_id.clone();
    match client.send(envelope).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "host command failed");
            ResponseEnvelope::error(request_id, e.to_string())
        }
    }
}

async fn write_response<W>(writer: &SharedWriter<W>, response: &ResponseEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response).map_err(|e| {
        BazaarError::Protocol(format!("failed to serialize response envelope: {e}"))
    })?;
    write_line(writer, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W>(writer: &SharedWriter<W>, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| BazaarError::Channel(format!("failed to write output: {e}")))?;
    w.write_all(b"\n")
        .await
        .map_err(|e| BazaarError::Channel(format!("failed to write newline: {e}")))?;
    w.flush()
        .await
        .map_err(|e| BazaarError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
