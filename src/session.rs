//! The top-level session loop.
//!
//! Owns the duplex byte stream to the UI and the single chat client handle.
//! After the startup handshake it interleaves three things on one runtime:
//! reading inbound frames (strictly one at a time), dispatching them as
//! concurrent tasks, and draining the shared outbound queue through a
//! single writer task so that replies and event notifications can never
//! interleave bytes on the wire.
//!
//! State machine: Startup → Connecting → Ready → (ReadCycle ⇄ Dispatch) →
//! ShuttingDown → Terminated. Startup failures produce one best-effort
//! error frame with a null id and a non-zero exit; after Ready, no inbound
//! failure is fatal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{ChatClient, ChatError};
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::events::EventBridge;
use crate::rpc::framing::{read_frame, write_frame, FramingError};
use crate::rpc::message::{classify, codes, Classified, JsonRpcResponse, RpcErrorObject};

/// Bound on queued outbound payloads before senders feel backpressure.
const OUTBOUND_QUEUE_BOUND: usize = 64;

/// How long shutdown waits for the writer to drain queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the bridge session over the given duplex stream.
///
/// `shutdown` resolves when the process receives an interrupt/termination
/// signal; the loop then disposes the event bridge, disconnects the client,
/// and returns. Inbound EOF ends the session the same way; a closed UI
/// pipe is an orderly end, not an error.
///
/// # Errors
///
/// Only startup failures (connect / identity fetch) return an error; by
/// then one error frame with `id: null` has already been emitted
/// best-effort.
pub async fn run<R, W, S>(
    client: Arc<dyn ChatClient>,
    registry: Arc<HandlerRegistry>,
    input: R,
    output: W,
    shutdown: S,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let mut output = output;

    // Connecting: ensure the session is live and identified before the
    // first frame is read.
    if let Err(err) = establish(client.as_ref()).await {
        let code = err.native_code().unwrap_or(codes::INTERNAL_ERROR);
        let frame =
            JsonRpcResponse::error(None, RpcErrorObject::new(code, err.to_string())).into_value();
        if let Err(write_err) = write_frame(&mut output, &frame).await {
            error!("failed to report startup failure: {write_err}");
        }
        return Err(err.into());
    }

    // Single writer task: the only code that touches the output stream
    // from here on.
    let (outbound_tx, outbound_rx) = mpsc::channel::<Value>(OUTBOUND_QUEUE_BOUND);
    let writer = tokio::spawn(write_loop(output, outbound_rx));

    // Ready: events may start flowing before the first request arrives.
    let bridge = EventBridge::activate(Arc::clone(&client), outbound_tx.clone());
    let dispatcher = Dispatcher::new(registry, Arc::clone(&client));

    let mut reader = BufReader::new(input);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            frame = read_frame(&mut reader) => match frame {
                Ok(payload) => {
                    route(&dispatcher, &outbound_tx, payload).await;
                }
                Err(FramingError::Eof) => {
                    info!("input stream closed");
                    break;
                }
                Err(FramingError::Parse(msg)) => {
                    debug!("undecodable body: {msg}");
                    enqueue_error(&outbound_tx, None, codes::PARSE_ERROR, msg).await;
                }
                Err(err @ FramingError::Io(_)) => {
                    // The stream position is undefined after an I/O error;
                    // report once and stop reading.
                    enqueue_error(&outbound_tx, None, codes::INTERNAL_ERROR, err.to_string())
                        .await;
                    error!("input stream failed: {err}");
                    break;
                }
                Err(err) => {
                    // Missing/invalid Content-Length, oversized frame: the
                    // header bytes are consumed, keep reading.
                    enqueue_error(&outbound_tx, None, codes::INTERNAL_ERROR, err.to_string())
                        .await;
                }
            }
        }
    }

    // ShuttingDown: subscription first, then the connection. In-flight
    // handler tasks are abandoned, not cancelled.
    bridge.dispose().await;
    if client.connected() {
        if let Err(err) = client.disconnect().await {
            warn!("disconnect failed during shutdown: {err}");
        }
    }

    drop(outbound_tx);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("writer task ended abnormally: {err}"),
        Err(_) => warn!("writer did not drain in time; abandoning queued frames"),
    }

    info!("session terminated");
    Ok(())
}

/// Classify one decoded payload and hand it off.
///
/// Requests and notifications run as spawned tasks so a slow handler never
/// blocks the next read; malformed payloads answer immediately.
async fn route(dispatcher: &Dispatcher, outbound: &mpsc::Sender<Value>, payload: Value) {
    match classify(&payload) {
        Classified::Request(request) => {
            debug!(method = %request.method, id = request.id, "request");
            let dispatcher = dispatcher.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let reply = dispatcher.dispatch_request(request).await;
                if outbound.send(reply.into_value()).await.is_err() {
                    debug!("reply dropped: writer already gone");
                }
            });
        }
        Classified::Notification(notification) => {
            debug!(method = %notification.method, "notification");
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch_notification(notification).await;
            });
        }
        Classified::Malformed { id, reason } => {
            enqueue_error(outbound, id, codes::INVALID_REQUEST, reason).await;
        }
    }
}

async fn enqueue_error(
    outbound: &mpsc::Sender<Value>,
    id: Option<i64>,
    code: i64,
    message: String,
) {
    let frame = JsonRpcResponse::error(id, RpcErrorObject::new(code, message)).into_value();
    if outbound.send(frame).await.is_err() {
        debug!("error frame dropped: writer already gone");
    }
}

/// The Connecting phase: live session plus own identity.
async fn establish(client: &dyn ChatClient) -> Result<(), ChatError> {
    if !client.connected() {
        client.connect().await?;
    }
    let me = client.get_me().await?;
    info!(user = %me.display_name(), id = me.id, "chat session ready");
    Ok(())
}

/// Writer task: sole owner of the output stream. Frames are written whole,
/// in queue order.
async fn write_loop<W>(mut output: W, mut outbound: mpsc::Receiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(err) = write_frame(&mut output, &payload).await {
            error!("failed to write frame: {err}");
            break;
        }
    }
}
