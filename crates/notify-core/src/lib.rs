//! # notify-core
//!
//! Shared library for the hub notification connection containing the wire
//! protocol codec, connection state types, reconnect schedules, and the
//! message types exchanged between subscriber contexts and the shared
//! multiplexer.
//!
//! This crate is used by both the worker (multiplexer) and client (facade)
//! crates.  It has zero dependencies on sockets, HTTP clients, or async
//! runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! Many browser-like "tabs" of one user session want real-time notifications
//! from the same hub.  Opening one socket per tab wastes server connections,
//! so a single background context owns the socket and fans messages out to
//! every tab.  This crate (`notify-core`) is the shared vocabulary:
//!
//! - **`protocol`** – How frames travel over the socket.  Each frame is one
//!   JSON object terminated by the ASCII record separator (`0x1E`).  The
//!   [`FrameDecoder`] turns an arbitrary stream of text chunks back into
//!   typed [`ProtocolFrame`]s.
//!
//! - **`domain`** – Pure types with no I/O: the [`ConnectionState`] machine
//!   states, the [`ReconnectPolicy`] backoff schedule, the port messages
//!   that subscribers and the multiplexer exchange, and a small listener
//!   registry used for callback-style observers.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `notify_core::ConnectionState` instead of the full module path.
pub use domain::activity::ClientActivity;
pub use domain::listeners::{ListenerId, ListenerRegistry};
pub use domain::port::{PortMessage, SubscriberId, WorkerMessage};
pub use domain::reconnect::ReconnectPolicy;
pub use domain::state::ConnectionState;
pub use protocol::codec::{decode_frame, encode_frame, encode_handshake_request, FrameDecoder};
pub use protocol::frames::{
    CloseFrame, FrameParseError, HandshakeResponse, InvocationFrame, ProtocolFrame, UnknownMessageType,
};
