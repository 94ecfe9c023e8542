//! Abstract chat-session capability consumed by the dispatcher and the
//! event bridge.
//!
//! Exactly one live `ChatClient` exists per process. The session loop owns
//! the handle and lends invoke access to the RPC dispatcher and the event
//! bridge; neither of them may disconnect it. The concrete implementation
//! (`backend::BackendClient`) talks to the chat-session daemon; tests use
//! in-memory stubs.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{ChatSummary, MessageInfo, PeerRef, UserInfo};

/// Chat-protocol error surface.
///
/// `Rpc` failures carry the chat protocol's native numeric code and are
/// surfaced verbatim in error replies; everything else maps to the generic
/// server-error code at the dispatch boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat protocol rejected the call with its own code/message.
    #[error("{message}")]
    Rpc {
        /// Native chat-protocol error code
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<Value>,
    },

    /// No live connection to the chat session.
    #[error("not connected to the chat session")]
    NotConnected,

    /// Call did not complete within the configured timeout.
    #[error("chat call timed out after {0}s")]
    Timeout(u64),

    /// Transport-level failure (socket closed, framing broke).
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer/entity could not be resolved.
    #[error("unknown entity {0}")]
    UnknownEntity(i64),
}

impl ChatError {
    /// The native protocol code, when this error carries one.
    pub fn native_code(&self) -> Option<i64> {
        match self {
            ChatError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// One raw event from the chat session, already discriminated.
///
/// The tag set is closed; anything the daemon sends that does not map onto
/// these variants arrives as `Other` and is dropped without error.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Phone-call signaling; feeds the call handshake continuation and
    /// never produces an outbound notification.
    CallSignal { user_id: i64, payload: Value },
    /// A user is typing in some dialog.
    Typing { user_id: i64, peer: PeerRef },
    /// New direct/short message.
    NewMessage { message: MessageInfo },
    /// Presence change.
    StatusUpdate { user_id: i64, online: bool },
    /// New message in a channel.
    NewChannelMessage { message: MessageInfo },
    /// New message in a group chat.
    NewChatMessage { message: MessageInfo },
    /// Unrecognized event tag; ignored by the bridge.
    Other(String),
}

/// A live event subscription: a stream of [`ChatEvent`]s plus a disposer.
///
/// Dropping the subscription disposes it as well; explicit [`dispose`] is
/// idempotent. The session loop disposes during shutdown, before severing
/// the client connection.
///
/// [`dispose`]: EventSubscription::dispose
pub struct EventSubscription {
    events: mpsc::Receiver<ChatEvent>,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(
        events: mpsc::Receiver<ChatEvent>,
        disposer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Receive the next event; `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Remove the underlying event registration. Safe to call twice; only
    /// the first call has any effect.
    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    /// Whether the disposer has already run.
    pub fn is_disposed(&self) -> bool {
        self.disposer.is_none()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The chat-session capability surface.
///
/// One authenticated chat-protocol session, shared by the dispatcher and
/// the event bridge. Concurrent invokes are assumed safe at this layer;
/// implementations must not require external locking.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Ensure the session is live; idempotent when already connected.
    async fn connect(&self) -> Result<(), ChatError>;

    /// Whether the session is currently usable.
    fn connected(&self) -> bool;

    /// Sever the session. Called only by the session loop during shutdown.
    async fn disconnect(&self) -> Result<(), ChatError>;

    /// The authenticated user's own identity.
    async fn get_me(&self) -> Result<UserInfo, ChatError>;

    /// Send a text message to a peer.
    async fn send_message(&self, peer: PeerRef, text: &str) -> Result<MessageInfo, ChatError>;

    /// Edit an existing message's text.
    async fn edit_message(
        &self,
        peer: PeerRef,
        message_id: i64,
        text: &str,
    ) -> Result<MessageInfo, ChatError>;

    /// Delete messages; returns how many were removed.
    async fn delete_messages(&self, peer: PeerRef, message_ids: &[i64]) -> Result<u64, ChatError>;

    /// Forward messages from one peer to another.
    async fn forward_messages(
        &self,
        from: PeerRef,
        message_ids: &[i64],
        to: PeerRef,
    ) -> Result<Vec<MessageInfo>, ChatError>;

    /// Most recent messages of a dialog, newest first.
    async fn history(&self, peer: PeerRef, limit: u32) -> Result<Vec<MessageInfo>, ChatError>;

    /// Search for users by name/username fragment.
    async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>, ChatError>;

    /// The dialog list.
    async fn get_dialogs(&self, limit: u32) -> Result<Vec<ChatSummary>, ChatError>;

    /// Resolve a user entity by id.
    async fn get_entity(&self, user_id: i64) -> Result<UserInfo, ChatError>;

    /// Mark a dialog unread.
    async fn mark_unread(&self, peer: PeerRef) -> Result<bool, ChatError>;

    /// Broadcast a typing indicator for a dialog.
    async fn set_typing(&self, peer: PeerRef, typing: bool) -> Result<bool, ChatError>;

    /// Initiate call setup with a user; returns the protocol's opaque
    /// negotiation state.
    async fn request_call(&self, user_id: i64) -> Result<Value, ChatError>;

    /// Continue an in-flight call handshake with an inbound signaling
    /// payload.
    async fn accept_call_signal(&self, payload: Value) -> Result<(), ChatError>;

    /// Register for raw session events. The returned subscription's
    /// disposer detaches it.
    fn subscribe(&self) -> EventSubscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_native_code_only_for_rpc_errors() {
        let rpc = ChatError::Rpc {
            code: 420,
            message: "FLOOD_WAIT".to_string(),
            data: None,
        };
        assert_eq!(rpc.native_code(), Some(420));
        assert_eq!(ChatError::NotConnected.native_code(), None);
        assert_eq!(
            ChatError::Transport("closed".to_string()).native_code(),
            None
        );
    }

    #[tokio::test]
    async fn test_subscription_dispose_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let (_tx, rx) = mpsc::channel(4);

        let mut sub = EventSubscription::new(rx, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!sub.is_disposed());

        sub.dispose();
        sub.dispose();
        assert!(sub.is_disposed());
        drop(sub);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_disposes_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let (_tx, rx) = mpsc::channel(4);

        {
            let _sub = EventSubscription::new(rx, move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = EventSubscription::new(rx, || {});

        tx.send(ChatEvent::StatusUpdate {
            user_id: 1,
            online: true,
        })
        .await
        .unwrap();
        drop(tx);

        match sub.recv().await {
            Some(ChatEvent::StatusUpdate { user_id, online }) => {
                assert_eq!(user_id, 1);
                assert!(online);
            }
            other => panic!("expected StatusUpdate, got {:?}", other),
        }
        assert!(sub.recv().await.is_none());
    }
}
