//! JSON-RPC 2.0 message shapes and inbound classification.
//!
//! An inbound payload is a Request when it carries a numeric `id`, a
//! Notification when it does not, and Malformed when it is not an object or
//! lacks a string `method`. Nothing else is validated at this layer;
//! parameter shapes are the handlers' concern.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string stamped on every outbound payload.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error codes used by the bridge.
pub mod codes {
    /// Body was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Message was not a valid request object (no/invalid `method`).
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method name is not in the dispatch table.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Generic handler failure without a native chat-protocol code.
    pub const SERVER_ERROR: i64 = -32000;
    /// Unexpected failure shape (panic, serialization, transport).
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// An outbound reply: success or error.
///
/// `id` is `None` (serialized as `null`) only for failures that occurred
/// before a request id could be determined: parse and transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl JsonRpcResponse {
    /// Success reply; `id` is copied verbatim from the originating request.
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Error reply addressed to `id`, or `id: null` when the failure
    /// happened before an id was known.
    pub fn error(id: Option<i64>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            // A response built from our own types always serializes; this
            // branch only guards against pathological Value payloads.
            serde_json::json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": null,
                "error": {"code": codes::INTERNAL_ERROR, "message": "response serialization failed"},
            })
        })
    }
}

/// Build an outbound notification (no `id` field; receiver must not reply).
pub fn make_notification(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// An inbound message expecting exactly one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: i64,
    pub method: String,
    pub params: Vec<Value>,
}

/// An inbound message with no `id`; no reply is ever sent for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Vec<Value>,
}

/// Outcome of classifying one decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Request(Request),
    Notification(Notification),
    /// Not an object, or `method` missing / not a string. Carries whatever
    /// numeric id was present so the error reply can still be addressed.
    Malformed { id: Option<i64>, reason: String },
}

/// Classify a parsed JSON value as Request, Notification, or Malformed.
///
/// A numeric `id` makes a Request; its absence makes a Notification. Extra
/// fields are ignored; a non-array `params` is treated as empty.
pub fn classify(value: &Value) -> Classified {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return Classified::Malformed {
                id: None,
                reason: "message is not an object".to_string(),
            }
        }
    };

    let id = obj.get("id").and_then(Value::as_i64);

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => {
            return Classified::Malformed {
                id,
                reason: "message has no string `method`".to_string(),
            }
        }
    };

    let params = obj
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match id {
        Some(id) => Classified::Request(Request { id, method, params }),
        None => Classified::Notification(Notification { method, params }),
    }
}
