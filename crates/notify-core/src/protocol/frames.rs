//! Hub protocol frame types.
//!
//! Every frame on the socket is a single JSON object followed by the ASCII
//! record separator (`0x1E`).  The integer `type` field selects the frame
//! kind; the very first frame from the hub is the handshake response, which
//! carries no `type` at all.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Frame delimiter: ASCII record separator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Sub-protocol name declared in the handshake request.
pub const PROTOCOL_NAME: &str = "json";

/// Sub-protocol version declared in the handshake request.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Message type codes ────────────────────────────────────────────────────────

/// Frame type codes used by the hub protocol.
///
/// Only `Invocation`, `Ping` and `Close` have dedicated variants in
/// [`ProtocolFrame`]; the others decode to [`ProtocolFrame::Unrecognized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

/// A `type` value outside the known message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown message type {0}")]
pub struct UnknownMessageType(pub u64);

impl TryFrom<u64> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: u64) -> Result<Self, UnknownMessageType> {
        match value {
            1 => Ok(MessageType::Invocation),
            2 => Ok(MessageType::StreamItem),
            3 => Ok(MessageType::Completion),
            4 => Ok(MessageType::StreamInvocation),
            5 => Ok(MessageType::CancelInvocation),
            6 => Ok(MessageType::Ping),
            7 => Ok(MessageType::Close),
            other => Err(UnknownMessageType(other)),
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// The handshake request sent by the client as soon as the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// The hub's answer to the handshake request.
///
/// An empty object is an acknowledgement; an object with an `error` field is
/// a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeResponse {
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Returns `true` if the hub accepted the handshake.
    pub fn is_ack(&self) -> bool {
        self.error.is_none()
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// A remote call: `{"type":1,"target":"...","arguments":[...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationFrame {
    /// Present only for invocations that expect a completion.
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Vec<Value>,
}

impl InvocationFrame {
    /// Builds a fire-and-forget invocation (no `invocationId`).
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }
}

/// The hub is closing the connection: `{"type":7}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseFrame {
    pub error: Option<String>,
    pub allow_reconnect: Option<bool>,
}

/// One decoded protocol frame.
///
/// This is a closed set.  Frame kinds this client does not act on are kept
/// as [`ProtocolFrame::Unrecognized`] rather than being folded into another
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    Handshake(HandshakeResponse),
    Invocation(InvocationFrame),
    Ping,
    Close(CloseFrame),
    Unrecognized { kind: u64 },
}

impl ProtocolFrame {
    /// Short name for log messages; never includes argument payloads.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProtocolFrame::Handshake(_) => "Handshake",
            ProtocolFrame::Invocation(_) => "Invocation",
            ProtocolFrame::Ping => "Ping",
            ProtocolFrame::Close(_) => "Close",
            ProtocolFrame::Unrecognized { .. } => "Unrecognized",
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a single delimited segment could not be turned into a frame.
///
/// The decoder never propagates these: a bad segment is logged and skipped
/// so that its siblings in the same chunk are still delivered.
#[derive(Debug, Error)]
pub enum FrameParseError {
    /// The segment is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The segment is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The `type` field is present but not a non-negative integer.
    #[error("invalid frame type field: {0}")]
    InvalidType(String),

    /// An invocation frame is missing its target or has malformed arguments.
    #[error("malformed invocation: {0}")]
    MalformedInvocation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_try_from_known_codes() {
        assert_eq!(MessageType::try_from(1), Ok(MessageType::Invocation));
        assert_eq!(MessageType::try_from(6), Ok(MessageType::Ping));
        assert_eq!(MessageType::try_from(7), Ok(MessageType::Close));
    }

    #[test]
    fn test_message_type_try_from_unknown_code_fails() {
        assert_eq!(MessageType::try_from(0), Err(UnknownMessageType(0)));
        assert_eq!(MessageType::try_from(42), Err(UnknownMessageType(42)));
        assert_eq!(UnknownMessageType(42).to_string(), "unknown message type 42");
    }

    #[test]
    fn test_handshake_response_without_error_is_ack() {
        assert!(HandshakeResponse::default().is_ack());
        let rejected = HandshakeResponse {
            error: Some("unsupported protocol".to_string()),
        };
        assert!(!rejected.is_ack());
    }

    #[test]
    fn test_default_handshake_request_declares_json_v1() {
        let req = HandshakeRequest::default();
        assert_eq!(req.protocol, "json");
        assert_eq!(req.version, 1);
    }

    #[test]
    fn test_kind_name_does_not_leak_arguments() {
        let frame = ProtocolFrame::Invocation(InvocationFrame::new(
            "ReceiveNotification",
            vec![Value::String("secret-body".to_string())],
        ));
        let name = frame.kind_name();
        assert_eq!(name, "Invocation");
        assert!(!name.contains("secret"));
    }
}
