//! tgram bridge library
//!
//! Core components of the JSON-RPC stdio bridge behind the tgram terminal
//! Telegram client:
//!
//! - `rpc` - Content-Length framing and JSON-RPC message shapes
//! - `client` - the abstract chat-session capability (`ChatClient`)
//! - `dispatch` - the immutable handler registry and request dispatcher
//! - `handlers` - the exposed RPC methods
//! - `events` - chat events → outbound notifications
//! - `session` - the top-level read/dispatch/write loop
//! - `backend` - concrete `ChatClient` over the session daemon socket
//! - `models` - wire data models shared by all of the above
//!
//! # Session loop
//!
//! The usual embedding reads frames from stdin and writes frames to stdout:
//!
//! ```ignore
//! use std::sync::Arc;
//! use tgram_bridge::{backend::BackendClient, dispatch::HandlerRegistry, session};
//!
//! let client = Arc::new(BackendClient::connect_with_retry(&socket, 5).await?);
//! let registry = Arc::new(HandlerRegistry::standard());
//! session::run(client, registry, tokio::io::stdin(), tokio::io::stdout(), shutdown).await?;
//! ```

pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod models;
pub mod rpc;
pub mod session;
pub mod testing;
