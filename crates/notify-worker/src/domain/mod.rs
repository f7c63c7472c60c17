//! Domain layer for notify-worker.
//!
//! # What belongs in the domain layer?
//!
//! - The [`Session`] / [`Connector`] seam between the state machine and the
//!   physical transport
//! - The events a session reports ([`SessionEvent`]) and its error taxonomy
//! - Configuration structures
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `reqwest`, or WebSocket types
//! - Timers or task spawning

pub mod config;
pub mod session;

pub use config::MultiplexerConfig;
pub use session::{Connector, EventCallback, Session, SessionEvent, TransportError};
