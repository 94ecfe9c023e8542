//! Test support: an in-memory [`ChatClient`] used by the unit and
//! integration suites.
//!
//! The stub keeps users and messages in process memory and lets a test
//! inject raw chat events into live subscriptions. It is deliberately part
//! of the library so integration tests under `tests/` can drive a full
//! session loop without a chat-session daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::client::{ChatClient, ChatError, ChatEvent, EventSubscription};
use crate::models::{ChatSummary, MessageInfo, PeerRef, UserInfo};

/// In-memory chat client for tests.
#[derive(Default)]
pub struct StubClient {
    connected: AtomicBool,
    fail_get_me: AtomicBool,
    next_message_id: AtomicI64,
    next_subscriber_id: AtomicUsize,
    users: Mutex<HashMap<i64, UserInfo>>,
    messages: Mutex<Vec<MessageInfo>>,
    subscribers: Arc<Mutex<Vec<(usize, mpsc::Sender<ChatEvent>)>>>,
    call_signals: Mutex<Vec<Value>>,
    disposed: Arc<AtomicUsize>,
}

impl StubClient {
    /// Register a user entity the stub will resolve.
    pub fn add_user(&self, user: UserInfo) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    /// Make `get_me` fail, to exercise startup-failure paths.
    pub fn fail_get_me(&self) {
        self.fail_get_me.store(true, Ordering::SeqCst);
    }

    /// Push a raw event into every live subscription.
    pub fn emit(&self, event: ChatEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        for (_, tx) in subscribers.iter() {
            let _ = tx.try_send(event.clone());
        }
    }

    /// Number of live (undisposed) subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// How many subscriptions have been disposed so far.
    pub fn disposed_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Call-signaling payloads accepted through `accept_call_signal`.
    pub fn call_signals(&self) -> Vec<Value> {
        self.call_signals.lock().unwrap().clone()
    }

    fn me(&self) -> UserInfo {
        UserInfo {
            id: 1,
            first_name: Some("Test".to_string()),
            last_name: Some("Session".to_string()),
            username: Some("testsession".to_string()),
            phone: None,
            is_online: None,
            is_typing: None,
            last_seen: None,
        }
    }

    fn new_message(&self, peer: PeerRef, text: &str, out: bool) -> MessageInfo {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        MessageInfo {
            id,
            peer,
            sender_id: if out { 1 } else { peer.id },
            text: Some(text.to_string()),
            date: Utc::now().timestamp(),
            edit_date: None,
            out,
        }
    }

}

#[async_trait]
impl ChatClient for StubClient {
    async fn connect(&self) -> Result<(), ChatError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get_me(&self) -> Result<UserInfo, ChatError> {
        if self.fail_get_me.load(Ordering::SeqCst) {
            return Err(ChatError::Rpc {
                code: 401,
                message: "AUTH_KEY_UNREGISTERED".to_string(),
                data: None,
            });
        }
        Ok(self.me())
    }

    async fn send_message(&self, peer: PeerRef, text: &str) -> Result<MessageInfo, ChatError> {
        let message = self.new_message(peer, text, true);
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn edit_message(
        &self,
        peer: PeerRef,
        message_id: i64,
        text: &str,
    ) -> Result<MessageInfo, ChatError> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.peer == peer && m.id == message_id)
            .ok_or(ChatError::Rpc {
                code: 400,
                message: "MESSAGE_ID_INVALID".to_string(),
                data: None,
            })?;
        message.text = Some(text.to_string());
        message.edit_date = Some(Utc::now().timestamp());
        Ok(message.clone())
    }

    async fn delete_messages(&self, peer: PeerRef, message_ids: &[i64]) -> Result<u64, ChatError> {
        let mut messages = self.messages.lock().unwrap();
        let before = messages.len();
        messages.retain(|m| !(m.peer == peer && message_ids.contains(&m.id)));
        Ok((before - messages.len()) as u64)
    }

    async fn forward_messages(
        &self,
        from: PeerRef,
        message_ids: &[i64],
        to: PeerRef,
    ) -> Result<Vec<MessageInfo>, ChatError> {
        let originals: Vec<MessageInfo> = {
            let messages = self.messages.lock().unwrap();
            messages
                .iter()
                .filter(|m| m.peer == from && message_ids.contains(&m.id))
                .cloned()
                .collect()
        };
        let mut forwarded = Vec::with_capacity(originals.len());
        for original in originals {
            let copy = self.new_message(to, original.text.as_deref().unwrap_or(""), true);
            self.messages.lock().unwrap().push(copy.clone());
            forwarded.push(copy);
        }
        Ok(forwarded)
    }

    async fn history(&self, peer: PeerRef, limit: u32) -> Result<Vec<MessageInfo>, ChatError> {
        let messages = self.messages.lock().unwrap();
        let mut history: Vec<MessageInfo> = messages
            .iter()
            .filter(|m| m.peer == peer)
            .cloned()
            .collect();
        history.sort_by_key(|m| std::cmp::Reverse(m.id));
        history.truncate(limit as usize);
        Ok(history)
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>, ChatError> {
        let needle = query.to_lowercase();
        let users = self.users.lock().unwrap();
        let mut found: Vec<UserInfo> = users
            .values()
            .filter(|u| {
                u.display_name().to_lowercase().contains(&needle)
                    || u.username
                        .as_deref()
                        .map(|name| name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort_by_key(|u| u.id);
        Ok(found)
    }

    async fn get_dialogs(&self, limit: u32) -> Result<Vec<ChatSummary>, ChatError> {
        let users = self.users.lock().unwrap();
        let mut dialogs: Vec<ChatSummary> = users
            .values()
            .map(|u| ChatSummary {
                peer: PeerRef::user(u.id),
                title: u.display_name(),
                username: u.username.clone(),
                unread_count: 0,
                last_message: None,
            })
            .collect();
        dialogs.sort_by_key(|d| d.peer.id);
        dialogs.truncate(limit as usize);
        Ok(dialogs)
    }

    async fn get_entity(&self, user_id: i64) -> Result<UserInfo, ChatError> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or(ChatError::UnknownEntity(user_id))
    }

    async fn mark_unread(&self, _peer: PeerRef) -> Result<bool, ChatError> {
        Ok(true)
    }

    async fn set_typing(&self, _peer: PeerRef, typing: bool) -> Result<bool, ChatError> {
        Ok(typing)
    }

    async fn request_call(&self, user_id: i64) -> Result<Value, ChatError> {
        Ok(json!({"state": "requested", "userId": user_id}))
    }

    async fn accept_call_signal(&self, payload: Value) -> Result<(), ChatError> {
        self.call_signals.lock().unwrap().push(payload);
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::channel(32);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push((id, tx));

        // Disposal removes the sender so further emits stop reaching this
        // subscription.
        let subscribers = Arc::clone(&self.subscribers);
        let disposed = Arc::clone(&self.disposed);
        EventSubscription::new(rx, move || {
            subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
            disposed.fetch_add(1, Ordering::SeqCst);
        })
    }
}
