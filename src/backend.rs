//! Backend client: the concrete [`ChatClient`] over a Unix domain socket.
//!
//! The chat-protocol session itself lives in the tgram session daemon; this
//! module is the in-process adapter. It speaks the same Content-Length
//! JSON-RPC framing as the stdio bridge: requests go out with incrementing
//! ids, a reader task routes responses back to pending calls by id, and
//! unsolicited `update*` notifications fan out to event subscribers.
//!
//! ```text
//! ┌──────────────┐        Unix Socket         ┌─────────────────┐
//! │ tgram-bridge │ ◄─────────────────────────►│  tgram daemon   │
//! │(BackendClient)│  JSON-RPC 2.0 + framing   │ (chat session)  │
//! └──────────────┘                            └─────────────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::{ChatClient, ChatError, ChatEvent, EventSubscription};
use crate::models::{ChatSummary, MessageInfo, PeerRef, UserInfo};
use crate::rpc::framing::{read_frame, write_frame, FramingError};

/// Default per-call timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bound on buffered events per subscription.
const EVENT_QUEUE_BOUND: usize = 64;

/// Errors establishing the daemon connection.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The socket does not exist or refused the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// Other I/O failure while connecting.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the default socket path for the session daemon.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/tgram.sock` (Linux standard)
/// 2. platform cache dir + `tgram.sock` (macOS)
/// 3. `/tmp/tgram.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("tgram.sock");
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("tgram.sock");
    }

    PathBuf::from("/tmp/tgram.sock")
}

/// State shared between the client handle and its reader task.
struct Shared {
    /// In-flight calls awaiting a response, keyed by request id.
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, ChatError>>>>,
    /// Live event subscriptions.
    subscribers: Mutex<Vec<(usize, mpsc::Sender<ChatEvent>)>>,
    /// Transport liveness: true from connect until the reader loop ends.
    transport_up: AtomicBool,
    /// Daemon-side chat session liveness, toggled by connect/disconnect.
    session_ready: AtomicBool,
}

/// [`ChatClient`] implementation backed by the session daemon.
pub struct BackendClient {
    shared: Arc<Shared>,
    writer: AsyncMutex<OwnedWriteHalf>,
    next_id: AtomicI64,
    next_subscriber_id: AtomicUsize,
    call_timeout: Duration,
}

impl BackendClient {
    /// Connect to the daemon at the given socket path.
    pub async fn connect_socket(socket_path: &Path) -> Result<Self, BackendError> {
        let stream = UnixStream::connect(socket_path).await.map_err(|err| {
            match err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    BackendError::ConnectionFailed(err)
                }
                _ => BackendError::Io(err),
            }
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Connect with retry and exponential backoff (100ms, 200ms, 400ms, …).
    ///
    /// Useful at startup when the daemon may still be coming up.
    pub async fn connect_with_retry(
        socket_path: &Path,
        max_attempts: u32,
    ) -> Result<Self, BackendError> {
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match Self::connect_socket(socket_path).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!(attempt, "daemon connect failed: {e}");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = Duration::from_millis(100 * (1 << (attempt - 1)));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.expect("max_attempts must be > 0"))
    }

    /// Wrap an already-connected stream. Tests use this with socket pairs.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            transport_up: AtomicBool::new(true),
            session_ready: AtomicBool::new(false),
        });

        tokio::spawn(read_loop(BufReader::new(read_half), Arc::clone(&shared)));

        Self {
            shared,
            writer: AsyncMutex::new(write_half),
            next_id: AtomicI64::new(1),
            next_subscriber_id: AtomicUsize::new(0),
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the per-call timeout. Default is 30 seconds.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.call_timeout = timeout;
    }

    /// Send one request and wait for its routed response.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ChatError> {
        if !self.shared.transport_up.load(Ordering::SeqCst) {
            return Err(ChatError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id, tx);

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = write_frame(&mut *writer, &request).await {
                self.shared.pending.lock().unwrap().remove(&id);
                return Err(ChatError::Transport(err.to_string()));
            }
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::Transport("connection closed".to_string())),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&id);
                Err(ChatError::Timeout(self.call_timeout.as_secs()))
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChatError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| ChatError::Transport(format!("malformed daemon reply: {e}")))
    }

    // =========================================================================
    // Auth flow (used by the login/logout subcommands, not by handlers)
    // =========================================================================

    /// Ask the daemon to send a login code; returns the code hash to pass
    /// back to [`sign_in`](Self::sign_in).
    pub async fn send_login_code(&self, phone: &str) -> Result<String, ChatError> {
        self.call_as("auth.sendCode", json!({ "phone": phone })).await
    }

    /// Complete the login with the code the user received.
    pub async fn sign_in(
        &self,
        phone: &str,
        code_hash: &str,
        code: &str,
    ) -> Result<UserInfo, ChatError> {
        self.call_as(
            "auth.signIn",
            json!({ "phone": phone, "codeHash": code_hash, "code": code }),
        )
        .await
    }

    /// Invalidate the daemon-side session.
    pub async fn log_out(&self) -> Result<bool, ChatError> {
        self.call_as("auth.logOut", json!({})).await
    }
}

#[async_trait]
impl ChatClient for BackendClient {
    async fn connect(&self) -> Result<(), ChatError> {
        if self.connected() {
            return Ok(());
        }
        self.call("session.connect", json!({})).await?;
        self.shared.session_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.shared.transport_up.load(Ordering::SeqCst)
            && self.shared.session_ready.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.shared.session_ready.store(false, Ordering::SeqCst);
        // Best-effort: tell the daemon, then close our write half.
        if let Err(err) = self.call("session.disconnect", json!({})).await {
            debug!("daemon disconnect call failed: {err}");
        }
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))
    }

    async fn get_me(&self) -> Result<UserInfo, ChatError> {
        self.call_as("users.me", json!({})).await
    }

    async fn send_message(&self, peer: PeerRef, text: &str) -> Result<MessageInfo, ChatError> {
        self.call_as("messages.send", json!({ "peer": peer, "text": text }))
            .await
    }

    async fn edit_message(
        &self,
        peer: PeerRef,
        message_id: i64,
        text: &str,
    ) -> Result<MessageInfo, ChatError> {
        self.call_as(
            "messages.edit",
            json!({ "peer": peer, "messageId": message_id, "text": text }),
        )
        .await
    }

    async fn delete_messages(&self, peer: PeerRef, message_ids: &[i64]) -> Result<u64, ChatError> {
        let result = self
            .call(
                "messages.delete",
                json!({ "peer": peer, "messageIds": message_ids }),
            )
            .await?;
        result
            .get("deleted")
            .and_then(Value::as_u64)
            .or_else(|| result.as_u64())
            .ok_or_else(|| ChatError::Transport("malformed daemon reply: no count".to_string()))
    }

    async fn forward_messages(
        &self,
        from: PeerRef,
        message_ids: &[i64],
        to: PeerRef,
    ) -> Result<Vec<MessageInfo>, ChatError> {
        self.call_as(
            "messages.forward",
            json!({ "from": from, "messageIds": message_ids, "to": to }),
        )
        .await
    }

    async fn history(&self, peer: PeerRef, limit: u32) -> Result<Vec<MessageInfo>, ChatError> {
        self.call_as("messages.history", json!({ "peer": peer, "limit": limit }))
            .await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>, ChatError> {
        self.call_as("users.search", json!({ "query": query })).await
    }

    async fn get_dialogs(&self, limit: u32) -> Result<Vec<ChatSummary>, ChatError> {
        self.call_as("dialogs.list", json!({ "limit": limit })).await
    }

    async fn get_entity(&self, user_id: i64) -> Result<UserInfo, ChatError> {
        self.call_as("users.get", json!({ "userId": user_id })).await
    }

    async fn mark_unread(&self, peer: PeerRef) -> Result<bool, ChatError> {
        self.call_as("dialogs.markUnread", json!({ "peer": peer }))
            .await
    }

    async fn set_typing(&self, peer: PeerRef, typing: bool) -> Result<bool, ChatError> {
        self.call_as(
            "messages.setTyping",
            json!({ "peer": peer, "typing": typing }),
        )
        .await
    }

    async fn request_call(&self, user_id: i64) -> Result<Value, ChatError> {
        self.call("calls.request", json!({ "userId": user_id })).await
    }

    async fn accept_call_signal(&self, payload: Value) -> Result<(), ChatError> {
        self.call("calls.signal", json!({ "payload": payload })).await?;
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_BOUND);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribers.lock().unwrap().push((id, tx));

        let shared = Arc::clone(&self.shared);
        EventSubscription::new(rx, move || {
            shared.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
        })
    }
}

/// Reader task: routes responses to pending calls by id and fans update
/// notifications out to subscribers. Runs until the stream ends.
async fn read_loop(mut reader: BufReader<OwnedReadHalf>, shared: Arc<Shared>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(payload) => route_inbound(&shared, payload),
            Err(FramingError::Eof) => {
                info!("daemon closed the connection");
                break;
            }
            Err(FramingError::Parse(msg)) => {
                // Skip the undecodable body, stay on the stream.
                warn!("undecodable frame from daemon: {msg}");
            }
            Err(FramingError::Io(err)) => {
                error!("daemon stream failed: {err}");
                break;
            }
            Err(err) => {
                warn!("bad frame from daemon: {err}");
            }
        }
    }

    shared.transport_up.store(false, Ordering::SeqCst);
    shared.session_ready.store(false, Ordering::SeqCst);

    // Fail everything still waiting, end all subscriptions.
    let mut pending = shared.pending.lock().unwrap();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ChatError::Transport("connection closed".to_string())));
    }
    drop(pending);
    shared.subscribers.lock().unwrap().clear();
}

/// One inbound frame: a response (has `id`) or an update notification.
fn route_inbound(shared: &Shared, payload: Value) {
    if let Some(id) = payload.get("id").and_then(Value::as_i64) {
        let result = match payload.get("error") {
            Some(err) => Err(ChatError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown daemon error")
                    .to_string(),
                data: err.get("data").cloned(),
            }),
            None => Ok(payload.get("result").cloned().unwrap_or(Value::Null)),
        };
        let waiter = shared.pending.lock().unwrap().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(id, "response for unknown call id"),
        }
    } else if let Some(method) = payload.get("method").and_then(Value::as_str) {
        let params = payload.get("params").cloned().unwrap_or(Value::Null);
        let event = event_from_update(method, params);
        let subscribers = shared.subscribers.lock().unwrap();
        for (_, tx) in subscribers.iter() {
            // A slow subscriber drops events rather than stalling the
            // reader; presence/typing updates are best-effort anyway.
            let _ = tx.try_send(event.clone());
        }
    } else {
        warn!("unroutable frame from daemon (no id, no method)");
    }
}

/// Map a daemon update tag onto the closed event set.
///
/// Payloads that do not parse degrade to `Other` so one malformed update
/// cannot take the subscription down.
fn event_from_update(method: &str, params: Value) -> ChatEvent {
    fn message_of(params: &Value) -> Option<MessageInfo> {
        serde_json::from_value(params.get("message")?.clone()).ok()
    }

    match method {
        "updatePhoneCall" => ChatEvent::CallSignal {
            user_id: params.get("userId").and_then(Value::as_i64).unwrap_or(0),
            payload: params,
        },
        "updateUserTyping" => {
            let user_id = params.get("userId").and_then(Value::as_i64).unwrap_or(0);
            let peer = params
                .get("peer")
                .and_then(|p| serde_json::from_value(p.clone()).ok())
                .unwrap_or_else(|| PeerRef::user(user_id));
            ChatEvent::Typing { user_id, peer }
        }
        "updateUserStatus" => ChatEvent::StatusUpdate {
            user_id: params.get("userId").and_then(Value::as_i64).unwrap_or(0),
            online: params.get("online").and_then(Value::as_bool).unwrap_or(false),
        },
        "updateNewMessage" | "updateShortMessage" => match message_of(&params) {
            Some(message) => ChatEvent::NewMessage { message },
            None => {
                warn!(method, "update without a parsable message");
                ChatEvent::Other(method.to_string())
            }
        },
        "updateNewChannelMessage" => match message_of(&params) {
            Some(message) => ChatEvent::NewChannelMessage { message },
            None => {
                warn!(method, "update without a parsable message");
                ChatEvent::Other(method.to_string())
            }
        },
        "updateNewChatMessage" | "updateShortChatMessage" => match message_of(&params) {
            Some(message) => ChatEvent::NewChatMessage { message },
            None => {
                warn!(method, "update without a parsable message");
                ChatEvent::Other(method.to_string())
            }
        },
        other => ChatEvent::Other(other.to_string()),
    }
}
