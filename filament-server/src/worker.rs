//! Request execution on the invocation worker pool.
//!
//! Business invocations never run on the connection's I/O task: each request
//! is submitted to the bounded pool, invoked on a blocking thread, and the
//! response is written back from the same worker.

use filament_core::{Registry, StatsSink};
use filament_protocol::{Encoder, Request, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// The write half of one accepted connection, shared by the workers that
/// serve its requests.
pub(crate) struct ResponseWriter {
    peer: SocketAddr,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    open: AtomicBool,
    encoder: Encoder,
}

impl ResponseWriter {
    pub(crate) fn new(peer: SocketAddr, writer: OwnedWriteHalf, encoder: Encoder) -> Self {
        Self {
            peer,
            writer: tokio::sync::Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
            encoder,
        }
    }

    /// Marks the connection closed; responses still in flight are dropped
    /// instead of written.
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Writes one response back, never blocking on a dead connection and
    /// never retrying a failed write.
    pub(crate) async fn send(&self, response: &Response) {
        if !self.is_open() {
            tracing::warn!(
                peer = %self.peer, sequence = response.sequence,
                "connection closed, dropping response"
            );
            return;
        }

        let encoded = match self.encoder.encode_response(response) {
            Ok(encoded) => encoded,
            Err(e) => {
                // The result itself does not fit the payload ceiling; tell
                // the caller instead of truncating.
                tracing::error!(peer = %self.peer, sequence = response.sequence, error = %e,
                    "failed to encode response");
                let fallback = Response::error(response.sequence, e.to_string());
                match self.encoder.encode_response(&fallback) {
                    Ok(encoded) => encoded,
                    Err(_) => return,
                }
            }
        };

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        let result = match writer.write_all(&encoded).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(peer = %self.peer, error = %e, "write failed, closing connection");
            self.mark_closed();
        } else {
            tracing::debug!(peer = %self.peer, sequence = response.sequence, "response sent");
        }
    }
}

/// Runs one request to completion: invoke on the blocking pool, record
/// stats, write the correlated response back.
pub(crate) async fn execute(
    registry: Arc<Registry>,
    sink: Option<Arc<dyn StatsSink>>,
    conn: Arc<ResponseWriter>,
    request: Request,
) {
    let start = Instant::now();
    let sequence = request.sequence;

    let outcome = tokio::task::spawn_blocking(move || invoke(&registry, sink, request, start)).await;
    let response = match outcome {
        Ok(response) => response,
        Err(e) => Response::error(sequence, format!("invocation panicked: {e}")),
    };

    conn.send(&response).await;
}

/// The blocking half: dispatch lookup, invocation, stats recording. The
/// request's trace context is held in a span for the duration of the call so
/// downstream logging can correlate, and dropped with it.
fn invoke(
    registry: &Registry,
    sink: Option<Arc<dyn StatsSink>>,
    request: Request,
    start: Instant,
) -> Response {
    let span = tracing::info_span!(
        "invoke",
        signature = %request.signature,
        sequence = request.sequence,
        trace = ?request.trace
    );
    let _guard = span.enter();

    let Some(entry) = registry.lookup(&request.signature) else {
        tracing::warn!("no such method");
        return Response::error(
            request.sequence,
            format!("no such method: {}", request.signature),
        );
    };

    let result = entry.invoke(&request.args);
    let end = Instant::now();
    let success = result.is_ok();
    entry.stats().record(start, end, success);
    if let Some(sink) = &sink {
        sink.on_invocation_recorded(entry.signature().as_str(), start, end, success);
    }

    match result {
        Ok(value) if value.is_null() => Response::ok(request.sequence, None),
        Ok(value) => Response::ok(request.sequence, Some(value)),
        Err(e) => {
            tracing::debug!(error = %e, "invocation failed");
            Response::error(request.sequence, e.to_string())
        }
    }
}
