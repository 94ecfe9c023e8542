//! RPC dispatch: method lookup, handler invocation, error mapping.
//!
//! The handler registry is built once at startup and never mutated; the
//! dispatcher is cloned into a task per inbound message. A handler failure
//! is converted to an error reply at this boundary; it never crashes the
//! session loop, and a panicking handler is caught and reported as an
//! internal error.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{ChatClient, ChatError};
use crate::rpc::message::{codes, JsonRpcResponse, Notification, Request, RpcErrorObject};

/// Failure of a single handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The chat protocol failed the call; native codes pass through to the
    /// error reply.
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// The positional parameters did not match the method's shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A handler result failed to serialize.
    #[error("result serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HandlerError {
    /// Map this failure onto the wire error object.
    ///
    /// Chat-protocol errors keep their native code and message; parameter
    /// and generic failures use the server-error code; serialization
    /// failures are unexpected shapes and use the internal-error code.
    fn into_error_object(self) -> RpcErrorObject {
        match self {
            HandlerError::Chat(ChatError::Rpc {
                code,
                message,
                data,
            }) => RpcErrorObject {
                code,
                message,
                data,
            },
            HandlerError::Chat(err) => {
                RpcErrorObject::new(codes::SERVER_ERROR, err.to_string())
            }
            HandlerError::InvalidParams(msg) => {
                RpcErrorObject::new(codes::SERVER_ERROR, format!("invalid params: {msg}"))
            }
            HandlerError::Serialize(err) => {
                RpcErrorObject::new(codes::INTERNAL_ERROR, err.to_string())
            }
        }
    }
}

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A registered method capability: `(client, positional params) -> result`.
pub type Handler = fn(Arc<dyn ChatClient>, Vec<Value>) -> HandlerFuture;

/// Immutable mapping from method name to handler.
///
/// Built once at process start and shared by reference with the session
/// loop; there is no runtime registration.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl HandlerRegistry {
    /// An empty registry, for tests that install their own handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The full method table exposed by the bridge.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (name, handler) in crate::handlers::standard_handlers() {
            registry.register(name, handler);
        }
        registry
    }

    /// Insert a handler. Only called while building the registry.
    pub fn register(&mut self, method: &'static str, handler: Handler) {
        self.handlers.insert(method, handler);
    }

    pub fn get(&self, method: &str) -> Option<&Handler> {
        self.handlers.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes classified messages to handlers and produces replies.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    client: Arc<dyn ChatClient>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, client: Arc<dyn ChatClient>) -> Self {
        Self { registry, client }
    }

    /// Service a Request and produce exactly one reply.
    ///
    /// Unknown methods answer with `method not found`; handler failures are
    /// mapped per [`HandlerError::into_error_object`]; a panicking handler
    /// yields an internal error. The reply always carries the request id.
    pub async fn dispatch_request(&self, request: Request) -> JsonRpcResponse {
        let handler = match self.registry.get(&request.method) {
            Some(handler) => *handler,
            None => {
                debug!(method = %request.method, id = request.id, "method not found");
                return JsonRpcResponse::error(
                    Some(request.id),
                    RpcErrorObject::new(
                        codes::METHOD_NOT_FOUND,
                        format!("method not found: {}", request.method),
                    ),
                );
            }
        };

        let id = request.id;
        let invocation = handler(Arc::clone(&self.client), request.params);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(result)) => JsonRpcResponse::success(id, result),
            Ok(Err(err)) => {
                debug!(method = %request.method, id, error = %err, "handler failed");
                JsonRpcResponse::error(Some(id), err.into_error_object())
            }
            Err(_) => {
                warn!(method = %request.method, id, "handler panicked");
                JsonRpcResponse::error(
                    Some(id),
                    RpcErrorObject::new(codes::INTERNAL_ERROR, "internal error in handler"),
                )
            }
        }
    }

    /// Service a Notification. Never produces output on the wire: failures
    /// and unknown methods go to the log only.
    pub async fn dispatch_notification(&self, notification: Notification) {
        let handler = match self.registry.get(&notification.method) {
            Some(handler) => *handler,
            None => {
                warn!(method = %notification.method, "unknown notification method");
                return;
            }
        };

        let invocation = handler(Arc::clone(&self.client), notification.params);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(method = %notification.method, error = %err, "notification handler failed");
            }
            Err(_) => {
                warn!(method = %notification.method, "notification handler panicked");
            }
        }
    }
}
