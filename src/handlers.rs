//! The RPC method handlers exposed by the bridge.
//!
//! Each handler receives the shared chat client and the request's positional
//! parameters, and returns a JSON-serializable result. Parameter shape
//! validation happens here, not in the classifier: a missing or malformed
//! argument fails the call, never the session loop.
//!
//! Peer ids arrive from the UI as JSON numbers or numeric strings; dialogs
//! and users share the id namespace from the UI's point of view, so most
//! methods take a bare id and a peer-kind discriminator is only read when
//! the UI supplies one.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::ChatClient;
use crate::dispatch::{Handler, HandlerError, HandlerFuture};
use crate::models::{PeerKind, PeerRef};

/// Default number of dialogs returned by `getUserChats`.
const DEFAULT_DIALOG_LIMIT: u32 = 50;

/// Default number of messages returned by `getAllMessages`.
const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// The full method table: name → handler, in dispatch-key order.
pub fn standard_handlers() -> Vec<(&'static str, Handler)> {
    vec![
        ("sendMessage", send_message as Handler),
        ("deleteMessage", delete_message as Handler),
        ("editMessage", edit_message as Handler),
        ("searchUsers", search_users as Handler),
        ("getUserChats", get_user_chats as Handler),
        ("getUserInfo", get_user_info as Handler),
        ("getAllMessages", get_all_messages as Handler),
        ("forwardMessage", forward_message as Handler),
        ("markUnRead", mark_unread as Handler),
        ("setUserTyping", set_user_typing as Handler),
        ("phoneCall", phone_call as Handler),
    ]
}

// =============================================================================
// Positional parameter extraction
// =============================================================================

fn arg<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a Value, HandlerError> {
    params
        .get(index)
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing argument `{name}`")))
}

/// Entity ids arrive as JSON numbers or numeric strings.
fn id_arg(params: &[Value], index: usize, name: &str) -> Result<i64, HandlerError> {
    let value = arg(params, index, name)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| HandlerError::InvalidParams(format!("`{name}` is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| HandlerError::InvalidParams(format!("`{name}` is not a numeric id"))),
        _ => Err(HandlerError::InvalidParams(format!(
            "`{name}` must be a number or numeric string"
        ))),
    }
}

fn string_arg(params: &[Value], index: usize, name: &str) -> Result<String, HandlerError> {
    arg(params, index, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HandlerError::InvalidParams(format!("`{name}` must be a string")))
}

fn opt_bool_arg(params: &[Value], index: usize, default: bool) -> bool {
    params
        .get(index)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn opt_limit_arg(params: &[Value], index: usize, default: u32) -> u32 {
    params
        .get(index)
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(default)
}

/// A peer argument: a bare id (defaults to the user/dialog namespace) or an
/// explicit `{kind, id}` object.
fn peer_arg(params: &[Value], index: usize, name: &str) -> Result<PeerRef, HandlerError> {
    let value = arg(params, index, name)?;
    if value.is_object() {
        return serde_json::from_value(value.clone())
            .map_err(|e| HandlerError::InvalidParams(format!("`{name}`: {e}")));
    }
    let id = id_arg(params, index, name)?;
    Ok(PeerRef {
        kind: PeerKind::User,
        id,
    })
}

fn to_result(value: impl serde::Serialize) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(value)?)
}

// =============================================================================
// Handlers
// =============================================================================

/// `sendMessage(peer, text)` → the sent message.
fn send_message(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let text = string_arg(&params, 1, "text")?;
        let message = client.send_message(peer, &text).await?;
        to_result(message)
    })
}

/// `deleteMessage(peer, messageId)` → `{deleted: <count>}`.
fn delete_message(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let message_id = id_arg(&params, 1, "messageId")?;
        let deleted = client.delete_messages(peer, &[message_id]).await?;
        Ok(json!({ "deleted": deleted }))
    })
}

/// `editMessage(peer, messageId, text)` → the edited message.
fn edit_message(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let message_id = id_arg(&params, 1, "messageId")?;
        let text = string_arg(&params, 2, "text")?;
        let message = client.edit_message(peer, message_id, &text).await?;
        to_result(message)
    })
}

/// `searchUsers(query)` → matching users.
fn search_users(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let query = string_arg(&params, 0, "query")?;
        let users = client.search_users(&query).await?;
        to_result(users)
    })
}

/// `getUserChats([limit])` → the dialog list.
fn get_user_chats(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let limit = opt_limit_arg(&params, 0, DEFAULT_DIALOG_LIMIT);
        let dialogs = client.get_dialogs(limit).await?;
        to_result(dialogs)
    })
}

/// `getUserInfo(userId)` → the resolved user entity.
fn get_user_info(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let user_id = id_arg(&params, 0, "userId")?;
        let user = client.get_entity(user_id).await?;
        to_result(user)
    })
}

/// `getAllMessages(peer, [limit])` → dialog history, newest first.
fn get_all_messages(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let limit = opt_limit_arg(&params, 1, DEFAULT_HISTORY_LIMIT);
        let messages = client.history(peer, limit).await?;
        to_result(messages)
    })
}

/// `forwardMessage(fromPeer, messageId, toPeer)` → the forwarded messages.
fn forward_message(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let from = peer_arg(&params, 0, "fromPeer")?;
        let message_id = id_arg(&params, 1, "messageId")?;
        let to = peer_arg(&params, 2, "toPeer")?;
        let messages = client.forward_messages(from, &[message_id], to).await?;
        to_result(messages)
    })
}

/// `markUnRead(peer)` → `{marked: <bool>}`.
fn mark_unread(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let marked = client.mark_unread(peer).await?;
        Ok(json!({ "marked": marked }))
    })
}

/// `setUserTyping(peer, [typing])` → `{typing: <bool>}`.
fn set_user_typing(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let peer = peer_arg(&params, 0, "peer")?;
        let typing = opt_bool_arg(&params, 1, true);
        let accepted = client.set_typing(peer, typing).await?;
        Ok(json!({ "typing": accepted }))
    })
}

/// `phoneCall(userId)` → the protocol's opaque call negotiation state.
///
/// Only call *initiation* is exposed here; signaling continuations arrive
/// through the event bridge and never produce a reply.
fn phone_call(client: Arc<dyn ChatClient>, params: Vec<Value>) -> HandlerFuture {
    Box::pin(async move {
        let user_id = id_arg(&params, 0, "userId")?;
        let state = client.request_call(user_id).await?;
        Ok(state)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageInfo, UserInfo};
    use crate::testing::StubClient;
    use pretty_assertions::assert_eq;

    fn stub_with_ada() -> Arc<StubClient> {
        let stub = StubClient::default();
        stub.add_user(UserInfo {
            id: 123,
            first_name: Some("Ada".to_string()),
            last_name: None,
            username: Some("ada".to_string()),
            phone: None,
            is_online: None,
            is_typing: None,
            last_seen: None,
        });
        Arc::new(stub)
    }

    async fn invoke(
        client: Arc<StubClient>,
        handler: Handler,
        params: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        handler(client, params).await
    }

    #[tokio::test]
    async fn test_get_user_info_accepts_string_id() {
        let client = stub_with_ada();
        let result = invoke(client, get_user_info, vec![json!("123")])
            .await
            .expect("handler failed");
        assert_eq!(result["firstName"], json!("Ada"));
        assert_eq!(result["id"], json!(123));
    }

    #[tokio::test]
    async fn test_get_user_info_missing_param_is_invalid_params() {
        let client = stub_with_ada();
        let err = invoke(client, get_user_info, vec![]).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_send_message_roundtrip() {
        let client = stub_with_ada();
        let result = invoke(
            Arc::clone(&client),
            send_message,
            vec![json!(123), json!("hello")],
        )
        .await
        .expect("handler failed");
        let message: MessageInfo = serde_json::from_value(result).unwrap();
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert_eq!(message.peer, PeerRef::user(123));
        assert!(message.out);
    }

    #[tokio::test]
    async fn test_delete_message_reports_count() {
        let client = stub_with_ada();
        let sent = invoke(
            Arc::clone(&client),
            send_message,
            vec![json!(123), json!("bye")],
        )
        .await
        .unwrap();
        let result = invoke(
            client,
            delete_message,
            vec![json!(123), sent["id"].clone()],
        )
        .await
        .expect("handler failed");
        assert_eq!(result, json!({"deleted": 1}));
    }

    #[tokio::test]
    async fn test_edit_message_rewrites_text() {
        let client = stub_with_ada();
        let sent = invoke(
            Arc::clone(&client),
            send_message,
            vec![json!(123), json!("draft")],
        )
        .await
        .unwrap();
        let result = invoke(
            client,
            edit_message,
            vec![json!(123), sent["id"].clone(), json!("final")],
        )
        .await
        .expect("handler failed");
        assert_eq!(result["text"], json!("final"));
        assert!(result["editDate"].is_i64());
    }

    #[tokio::test]
    async fn test_search_users_matches_by_name() {
        let client = stub_with_ada();
        let result = invoke(client, search_users, vec![json!("ad")])
            .await
            .expect("handler failed");
        let users: Vec<UserInfo> = serde_json::from_value(result).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, 123);
    }

    #[tokio::test]
    async fn test_set_user_typing_defaults_to_true() {
        let client = stub_with_ada();
        let result = invoke(client, set_user_typing, vec![json!(123)])
            .await
            .expect("handler failed");
        assert_eq!(result, json!({"typing": true}));
    }

    #[tokio::test]
    async fn test_unknown_entity_surfaces_chat_error() {
        let client = Arc::new(StubClient::default());
        let err = invoke(client, get_user_info, vec![json!(404)])
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Chat(_)));
    }

    #[tokio::test]
    async fn test_peer_arg_accepts_explicit_kind_object() {
        let client = stub_with_ada();
        let result = invoke(
            client,
            get_all_messages,
            vec![json!({"kind": "channel", "id": 55})],
        )
        .await
        .expect("handler failed");
        assert_eq!(result, json!([]));
    }

    #[test]
    fn test_id_arg_rejects_non_numeric_string() {
        let err = id_arg(&[json!("abc")], 0, "userId").unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[test]
    fn test_limit_arg_defaults_and_caps() {
        assert_eq!(opt_limit_arg(&[], 0, 50), 50);
        assert_eq!(opt_limit_arg(&[json!(10)], 0, 50), 10);
        assert_eq!(opt_limit_arg(&[json!(-3)], 0, 50), 50);
    }
}
