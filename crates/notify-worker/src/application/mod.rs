//! Application layer for notify-worker.
//!
//! The application layer owns the connection *policy*: when to open a
//! session, who hears about what, when to retry and when to give up.  It
//! talks to the hub only through the [`Connector`](crate::domain::Connector)
//! trait.
//!
//! # Responsibilities
//!
//! - Tracking subscriber ports and fanning messages out to them
//! - The shared connection state machine and its reconnect schedule
//! - Arming the reconnect and ping timers (`tokio::time`)
//!
//! # What does NOT belong here?
//!
//! - HTTP requests and sockets (that is infrastructure)
//! - Spawning the multiplexer task itself (see `infrastructure::runtime`)

pub mod multiplexer;

pub use multiplexer::{MuxEvent, Multiplexer};
