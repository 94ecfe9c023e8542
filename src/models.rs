//! Data models for the tgram bridge.
//!
//! These Rust structs match the JSON shapes the UI consumes on the wire and
//! the chat-session daemon produces. They use serde with camelCase renames
//! throughout so handler results and event notifications serialize directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of peer a message or dialog belongs to.
///
/// Includes `Unknown` variant for forward-compatibility with new peer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerKind {
    User,
    Chat,
    Channel,
    /// Forward-compatible fallback for unknown peer kinds
    #[serde(other)]
    Unknown,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::User => "user",
            PeerKind::Chat => "chat",
            PeerKind::Channel => "channel",
            PeerKind::Unknown => "unknown",
        }
    }
}

/// Reference to a peer: the entity id plus which namespace it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    pub kind: PeerKind,
    pub id: i64,
}

impl PeerRef {
    pub fn user(id: i64) -> Self {
        Self {
            kind: PeerKind::User,
            id,
        }
    }

    pub fn chat(id: i64) -> Self {
        Self {
            kind: PeerKind::Chat,
            id,
        }
    }

    pub fn channel(id: i64) -> Self {
        Self {
            kind: PeerKind::Channel,
            id,
        }
    }
}

/// A chat-protocol user as the UI sees it.
///
/// `is_online` / `is_typing` are presence decorations: absent on plain
/// entity lookups, set by the event bridge when it emits presence and
/// typing notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    /// Unix seconds of the last seen timestamp, if the peer exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl UserInfo {
    /// Display name: first + last, falling back to @username, phone, or id.
    pub fn display_name(&self) -> String {
        let mut parts = Vec::new();
        if let Some(first) = self.first_name.as_deref() {
            if !first.trim().is_empty() {
                parts.push(first.trim());
            }
        }
        if let Some(last) = self.last_name.as_deref() {
            if !last.trim().is_empty() {
                parts.push(last.trim());
            }
        }
        if !parts.is_empty() {
            return parts.join(" ");
        }
        if let Some(username) = self.username.as_deref() {
            if !username.trim().is_empty() {
                return format!("@{}", username.trim());
            }
        }
        if let Some(phone) = self.phone.as_deref() {
            if !phone.trim().is_empty() {
                return phone.trim().to_string();
            }
        }
        format!("user {}", self.id)
    }

    pub fn last_seen_time(&self) -> Option<DateTime<Utc>> {
        self.last_seen.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// One message as shown in a conversation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: i64,
    pub peer: PeerRef,
    pub sender_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    /// Unix seconds.
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    /// True when the current session sent this message.
    #[serde(default)]
    pub out: bool,
}

impl MessageInfo {
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

/// One entry of the chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub peer: PeerRef,
    pub title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageInfo>,
}
