//! Text codec for hub protocol frames.
//!
//! Wire format:
//! ```text
//! {json object}\x1E{json object}\x1E{partial json ...
//! ```
//!
//! # Why a buffering decoder is needed
//!
//! A WebSocket text message is not guaranteed to hold exactly one frame:
//!
//! - It may hold several complete frames (the hub batches them).
//! - It may end in the middle of a frame that the next message completes.
//!
//! [`FrameDecoder`] keeps whatever follows the last separator and prepends
//! it to the next chunk, so callers never have to care where chunk
//! boundaries fall.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::protocol::frames::{
    CloseFrame, FrameParseError, HandshakeRequest, HandshakeResponse, InvocationFrame,
    MessageType, ProtocolFrame, RECORD_SEPARATOR,
};

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a frame as JSON followed by the record separator.
///
/// # Examples
///
/// ```rust
/// use notify_core::protocol::{encode_frame, ProtocolFrame};
///
/// assert_eq!(encode_frame(&ProtocolFrame::Ping), "{\"type\":6}\u{1e}");
/// ```
pub fn encode_frame(frame: &ProtocolFrame) -> String {
    let mut out = frame_to_value(frame).to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// Encodes the handshake request: `{"protocol":"json","version":1}` + separator.
///
/// # Errors
///
/// Returns the serializer's error; a [`HandshakeRequest`] always serializes.
pub fn encode_handshake_request() -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string(&HandshakeRequest::default())?;
    out.push(RECORD_SEPARATOR);
    Ok(out)
}

fn frame_to_value(frame: &ProtocolFrame) -> Value {
    match frame {
        ProtocolFrame::Handshake(h) => match &h.error {
            Some(error) => json!({ "error": error }),
            None => json!({}),
        },
        ProtocolFrame::Invocation(inv) => {
            let mut obj = Map::new();
            obj.insert("type".into(), json!(MessageType::Invocation as u8));
            if let Some(id) = &inv.invocation_id {
                obj.insert("invocationId".into(), json!(id));
            }
            obj.insert("target".into(), json!(inv.target));
            obj.insert("arguments".into(), Value::Array(inv.arguments.clone()));
            Value::Object(obj)
        }
        ProtocolFrame::Ping => json!({ "type": MessageType::Ping as u8 }),
        ProtocolFrame::Close(close) => {
            let mut obj = Map::new();
            obj.insert("type".into(), json!(MessageType::Close as u8));
            if let Some(error) = &close.error {
                obj.insert("error".into(), json!(error));
            }
            if let Some(allow) = close.allow_reconnect {
                obj.insert("allowReconnect".into(), json!(allow));
            }
            Value::Object(obj)
        }
        ProtocolFrame::Unrecognized { kind } => json!({ "type": kind }),
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one separator-free segment into a frame.
///
/// Classification:
///
/// | Shape                         | Frame                          |
/// |-------------------------------|--------------------------------|
/// | no `type`, no `error`         | handshake acknowledgement      |
/// | no `type`, `error` present    | handshake rejection            |
/// | `type: 1`                     | invocation                     |
/// | `type: 6`                     | ping                           |
/// | `type: 7`                     | close                          |
/// | any other integer `type`      | unrecognized                   |
///
/// # Errors
///
/// Returns [`FrameParseError`] if the segment is not a JSON object, the
/// `type` field is not an integer, or an invocation lacks a string target.
pub fn decode_frame(segment: &str) -> Result<ProtocolFrame, FrameParseError> {
    let value: Value = serde_json::from_str(segment)?;
    let Value::Object(obj) = value else {
        return Err(FrameParseError::NotAnObject);
    };

    let Some(kind) = obj.get("type") else {
        let error = obj.get("error").map(error_text);
        return Ok(ProtocolFrame::Handshake(HandshakeResponse { error }));
    };

    let kind = kind
        .as_u64()
        .ok_or_else(|| FrameParseError::InvalidType(kind.to_string()))?;

    match MessageType::try_from(kind) {
        Ok(MessageType::Invocation) => decode_invocation(obj).map(ProtocolFrame::Invocation),
        Ok(MessageType::Ping) => Ok(ProtocolFrame::Ping),
        Ok(MessageType::Close) => Ok(ProtocolFrame::Close(CloseFrame {
            error: obj.get("error").map(error_text),
            allow_reconnect: obj.get("allowReconnect").and_then(Value::as_bool),
        })),
        _ => Ok(ProtocolFrame::Unrecognized { kind }),
    }
}

fn decode_invocation(mut obj: Map<String, Value>) -> Result<InvocationFrame, FrameParseError> {
    let target = match obj.remove("target") {
        Some(Value::String(target)) => target,
        Some(other) => {
            return Err(FrameParseError::MalformedInvocation(format!(
                "target must be a string, got {other}"
            )))
        }
        None => {
            return Err(FrameParseError::MalformedInvocation(
                "missing target".to_string(),
            ))
        }
    };

    let arguments = match obj.remove("arguments") {
        Some(Value::Array(args)) => args,
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            return Err(FrameParseError::MalformedInvocation(format!(
                "arguments must be an array, got {other}"
            )))
        }
    };

    let invocation_id = match obj.remove("invocationId") {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };

    Ok(InvocationFrame {
        invocation_id,
        target,
        arguments,
    })
}

/// Error fields are normally strings, but we keep whatever the hub sent.
fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Streaming decoder ─────────────────────────────────────────────────────────

/// Incremental decoder for a stream of text chunks.
///
/// # Examples
///
/// ```rust
/// use notify_core::protocol::{FrameDecoder, ProtocolFrame};
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.push("{\"type\":").is_empty());
/// assert_eq!(decoder.push("6}\u{1e}"), vec![ProtocolFrame::Ping]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received after the most recent separator.
    pending: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame completed by it, in order.
    ///
    /// Empty segments (two separators in a row) are dropped.  Segments that
    /// fail to parse are logged and skipped without affecting the others.
    pub fn push(&mut self, chunk: &str) -> Vec<ProtocolFrame> {
        self.pending.push_str(chunk);

        let Some(last_sep) = self.pending.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        // The separator is a single byte in UTF-8, so `..=last_sep` is a
        // valid char boundary.
        let complete: String = self.pending.drain(..=last_sep).collect();

        complete
            .split(RECORD_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| match decode_frame(segment) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!("dropping unparseable frame segment ({} bytes): {e}", segment.len());
                    None
                }
            })
            .collect()
    }

    /// Number of buffered bytes still waiting for a separator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
