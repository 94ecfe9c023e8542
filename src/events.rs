//! Event bridge: chat-session events → outbound JSON-RPC notifications.
//!
//! The bridge subscribes once to the shared client's raw event stream and
//! translates each recognized event into exactly one outbound notification.
//! Phone-call signaling is the exception: it only continues the in-flight
//! call handshake and emits nothing. Unrecognized tags are ignored, and a
//! failed translation drops that single event; the subscription stays live
//! for everything that follows.
//!
//! User references are resolved through a read-through, time-expiring
//! entity cache so a burst of typing/presence events does not hammer the
//! backend with identical lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ChatClient, ChatError, ChatEvent};
use crate::models::UserInfo;
use crate::rpc::message::make_notification;

/// How long a resolved entity stays fresh.
const ENTITY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Read-through cache of resolved user entities.
///
/// Entries expire after the TTL; lookups are idempotent so last-writer-wins
/// on refresh is fine.
pub struct EntityCache {
    ttl: Duration,
    entries: HashMap<i64, (UserInfo, Instant)>,
}

impl EntityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// A fresh entry, or `None` if absent/expired (expired entries are
    /// evicted on access).
    pub fn get(&mut self, user_id: i64) -> Option<UserInfo> {
        match self.entries.get(&user_id) {
            Some((user, fetched_at)) if fetched_at.elapsed() < self.ttl => Some(user.clone()),
            Some(_) => {
                self.entries.remove(&user_id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, user: UserInfo) {
        self.entries.insert(user.id, (user, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn resolve_user(
    client: &dyn ChatClient,
    cache: &mut EntityCache,
    user_id: i64,
) -> Result<UserInfo, ChatError> {
    if let Some(user) = cache.get(user_id) {
        return Ok(user);
    }
    let user = client.get_entity(user_id).await?;
    cache.insert(user.clone());
    Ok(user)
}

/// Translate one raw event into at most one outbound notification.
///
/// `Ok(None)` means the event is consumed without wire output (call
/// signaling, unknown tags).
pub(crate) async fn translate(
    event: ChatEvent,
    client: &dyn ChatClient,
    cache: &mut EntityCache,
) -> Result<Option<Value>, ChatError> {
    match event {
        ChatEvent::Typing { user_id, .. } => {
            let mut user = resolve_user(client, cache, user_id).await?;
            user.is_online = Some(true);
            user.is_typing = Some(true);
            Ok(Some(make_notification(
                "userTyping",
                json!({ "user": user }),
            )))
        }
        ChatEvent::StatusUpdate { user_id, online } => {
            let mut user = resolve_user(client, cache, user_id).await?;
            user.is_online = Some(online);
            Ok(Some(make_notification(
                "userOnlineOffline",
                json!({ "user": user }),
            )))
        }
        ChatEvent::NewMessage { message }
        | ChatEvent::NewChannelMessage { message }
        | ChatEvent::NewChatMessage { message } => Ok(Some(make_notification(
            "newMessage",
            json!({ "message": message }),
        ))),
        ChatEvent::CallSignal { payload, .. } => {
            // Handshake continuation only; nothing goes out on the wire.
            client.accept_call_signal(payload).await?;
            Ok(None)
        }
        ChatEvent::Other(tag) => {
            debug!(tag = %tag, "ignoring unrecognized event tag");
            Ok(None)
        }
    }
}

/// A running event bridge; [`dispose`] detaches the subscription and waits
/// for the bridge task to finish.
///
/// [`dispose`]: EventBridge::dispose
pub struct EventBridge {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Subscribe to the client's events and start forwarding notifications
    /// into the outbound queue.
    pub fn activate(client: Arc<dyn ChatClient>, outbound: mpsc::Sender<Value>) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_bridge(client, outbound, stop_rx));
        Self {
            stop: stop_tx,
            task,
        }
    }

    /// Remove the event subscription and stop the bridge. Consumes the
    /// handle, so disposal happens at most once.
    pub async fn dispose(self) {
        // The bridge may already have exited (event stream ended); a failed
        // send is fine either way.
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            warn!("event bridge task ended abnormally: {err}");
        }
    }
}

async fn run_bridge(
    client: Arc<dyn ChatClient>,
    outbound: mpsc::Sender<Value>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut subscription = client.subscribe();
    let mut cache = EntityCache::new(ENTITY_CACHE_TTL);
    debug!("event bridge active");

    loop {
        tokio::select! {
            _ = &mut stop => {
                subscription.dispose();
                debug!("event bridge disposed");
                return;
            }
            event = subscription.recv() => {
                let event = match event {
                    Some(event) => event,
                    None => {
                        debug!("event stream ended");
                        return;
                    }
                };
                match translate(event, client.as_ref(), &mut cache).await {
                    Ok(Some(notification)) => {
                        if outbound.send(notification).await.is_err() {
                            // Writer is gone; the session is shutting down.
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // Drop this event, keep the subscription alive.
                        warn!("failed to translate event: {err}");
                    }
                }
            }
        }
    }
}
