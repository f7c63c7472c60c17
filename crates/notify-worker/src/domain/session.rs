//! The seam between connection state machines and the physical transport.
//!
//! A [`Session`] is one attempt at a hub connection: negotiate, open the
//! socket, handshake, then stream frames until it closes.  Sessions are
//! never reused; reconnecting means asking the [`Connector`] for a new one.
//!
//! Every session reports its lifecycle through a single callback, in this
//! order:
//!
//! ```text
//! Opened?  Frame*  Error?  Closed
//! ```
//!
//! `Closed` is reported exactly once, whether the hub went away, the
//! handshake was rejected, or the owner called [`Session::close`].

use notify_core::ProtocolFrame;
use thiserror::Error;

/// Why a session attempt failed.  Reported through [`SessionEvent::Error`]
/// right before [`SessionEvent::Closed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The hub URL could not be parsed or rewritten to a socket URL.
    #[error("invalid hub URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The negotiate request failed or its response was unusable.
    #[error("negotiate failed: {0}")]
    Negotiate(String),

    /// The negotiate endpoint answered with a non-success status.
    #[error("negotiate returned HTTP {0}")]
    NegotiateStatus(u16),

    /// The handshake response carried an error, was not a handshake at
    /// all, or did not arrive in time.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The socket could not be opened or failed while open.
    #[error("socket error: {0}")]
    Socket(String),
}

/// Lifecycle notifications from a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake acknowledged; [`Session::send`] now writes to the socket.
    Opened,
    /// A decoded frame received after the handshake.
    Frame(ProtocolFrame),
    /// A transport failure.  Always followed by `Closed`.
    Error(TransportError),
    /// The session is over.  Reported exactly once.
    Closed,
}

/// Receives every [`SessionEvent`] of one session.
///
/// Called from the transport's own task, so implementations should hand
/// the event to their owner (typically over a channel) and return.
pub type EventCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// One physical hub connection attempt.
pub trait Session: Send {
    /// Writes one frame.  Silently dropped before `Opened` and after
    /// `Closed`.
    fn send(&self, frame: &ProtocolFrame);

    /// Closes the session.  Idempotent; `Closed` is still reported once.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Creates sessions.  The production implementation is
/// [`HubConnector`](crate::infrastructure::hub_transport::HubConnector);
/// tests inject recording doubles.
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    /// Starts a new session against `hub_url` and returns immediately.
    /// All progress is reported through `on_event`.
    fn open(&self, hub_url: &str, on_event: EventCallback) -> Box<dyn Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_messages_name_the_phase() {
        assert_eq!(
            TransportError::NegotiateStatus(503).to_string(),
            "negotiate returned HTTP 503"
        );
        assert_eq!(
            TransportError::Handshake("unsupported protocol".into()).to_string(),
            "handshake failed: unsupported protocol"
        );
        let err = TransportError::InvalidUrl {
            url: "ftp://x".into(),
            reason: "unsupported scheme".into(),
        };
        assert!(err.to_string().contains("ftp://x"));
    }
}
