//! Content-Length message framing for JSON-RPC over byte streams.
//!
//! This module implements HTTP-style Content-Length framing, the same protocol
//! used by the Language Server Protocol (LSP). This enables reliable message
//! boundaries over stream-oriented transports: the stdio channel to the UI and
//! the Unix socket to the chat-session daemon share this codec.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <json-body>
//! ```
//!
//! `<length>` is the UTF-8 **byte** length of the body, not its character
//! count. Header parsing is case-insensitive and handles both CRLF and LF
//! line endings; unknown headers are ignored.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB) to prevent OOM from malicious/buggy peers.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Framing-layer error taxonomy.
///
/// Every variant except `Eof` and `Io` is recoverable at the session level:
/// the reader is positioned past the offending frame's headers and the loop
/// may continue with the next frame.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The stream ended at a frame boundary (peer closed the pipe).
    #[error("stream closed")]
    Eof,

    /// Headers ended without a Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Content-Length was present but not a positive base-10 integer.
    #[error("invalid Content-Length value: {0}")]
    InvalidContentLength(String),

    /// Content-Length exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {0} bytes exceeds maximum of {MAX_FRAME_SIZE} bytes")]
    Oversized(usize),

    /// The body was read but is not valid JSON (or not valid UTF-8).
    #[error("body is not valid JSON: {0}")]
    Parse(String),

    /// I/O failure mid-frame; the stream position is undefined.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one Content-Length framed JSON payload from the stream.
///
/// # Protocol
///
/// 1. Read header lines until an empty line (handles both CRLF and LF)
/// 2. Extract the Content-Length header (case-insensitive name match)
/// 3. Read exactly that many bytes for the body
/// 4. Parse the body as JSON
///
/// Partial arrival is handled by the buffered reader: reads suspend until
/// more bytes are available and resume without losing accumulated data.
///
/// # Errors
///
/// Fails with [`FramingError::Eof`] if the stream closes before the first
/// header byte, [`FramingError::MissingContentLength`] /
/// [`FramingError::InvalidContentLength`] for bad headers,
/// [`FramingError::Oversized`] for frames over the size cap, and
/// [`FramingError::Parse`] when the body is not JSON.
pub async fn read_frame<R>(reader: &mut R) -> Result<Value, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<Result<usize, String>> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        // EOF - the peer closed the stream.
        if bytes_read == 0 {
            return Err(FramingError::Eof);
        }

        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        // Parse on the first ':', trim key and value; header names match
        // case-insensitively per the HTTP convention.
        if let Some(colon_pos) = trimmed.find(':') {
            let key = trimmed[..colon_pos].trim();
            let value = trimmed[colon_pos + 1..].trim();

            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(match value.parse::<usize>() {
                    Ok(0) | Err(_) => Err(value.to_string()),
                    Ok(n) => Ok(n),
                });
            }
            // Ignore other headers (e.g., Content-Type)
        }
    }

    let size = match content_length {
        None => return Err(FramingError::MissingContentLength),
        Some(Err(raw)) => return Err(FramingError::InvalidContentLength(raw)),
        Some(Ok(n)) => n,
    };

    if size > MAX_FRAME_SIZE {
        return Err(FramingError::Oversized(size));
    }

    // Read exactly `size` body bytes, regardless of intervening newlines.
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    let text = String::from_utf8(body).map_err(|e| FramingError::Parse(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| FramingError::Parse(e.to_string()))
}

/// Write one Content-Length framed JSON payload to the stream.
///
/// Serializes the payload, emits `Content-Length: <N>\r\n\r\n` followed by
/// the JSON bytes, and flushes. The caller must hold exclusive access to the
/// writer for the duration of the call; the session's writer task does, so
/// two frames' bytes can never interleave on a shared stream.
pub async fn write_frame<W>(writer: &mut W, payload: &Value) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_string(payload)
        .map_err(|e| FramingError::Parse(e.to_string()))?;
    let body_bytes = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", body_bytes.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body_bytes).await?;
    writer.flush().await?;

    Ok(())
}
