//! JSON-RPC 2.0 wire layer shared by the stdio bridge and the backend socket.
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 47\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"getUserInfo","id":1}
//! ```
//!
//! The `framing` module owns frame boundaries; the `message` module owns the
//! JSON shapes and the request/notification classification on top of them.

pub mod framing;
pub mod message;

pub use framing::{read_frame, write_frame, FramingError};
pub use message::{
    classify, Classified, JsonRpcResponse, Notification, Request, RpcErrorObject,
};
