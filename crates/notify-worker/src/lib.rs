//! notify-worker library crate.
//!
//! This crate implements the shared side of the hub connection: a single
//! background task that owns exactly one socket to the hub and fans every
//! notification out to any number of subscriber ports.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Subscriber ports (one per tab)
//!         ↕  PortMessage / WorkerMessage
//! [notify-worker]
//!   ├── domain/           Session + Connector traits, SessionEvent, config
//!   ├── application/      Multiplexer state machine (one event at a time)
//!   └── infrastructure/
//!         ├── hub_transport/ negotiate (reqwest) + WebSocket (tokio-tungstenite)
//!         ├── runtime/       the multiplexer task, MultiplexerHandle, SubscriberPort
//!         └── mock/          recording connector for tests
//!         ↕
//! Hub (negotiate over HTTP, then framed JSON over WebSocket)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` traits only; the real transport is
//!   injected, which is what lets the state machine be tested without a hub.
//! - `infrastructure` owns HTTP, sockets and task spawning.

/// Domain layer: transport traits, session events and configuration.
pub mod domain;

/// Application layer: the multiplexer state machine.
pub mod application;

/// Infrastructure layer: hub transport, task runtime and test doubles.
pub mod infrastructure;

pub use application::multiplexer::{MuxEvent, Multiplexer};
pub use domain::{Connector, EventCallback, MultiplexerConfig, Session, SessionEvent, TransportError};
pub use infrastructure::hub_transport::HubConnector;
pub use infrastructure::runtime::{spawn_multiplexer, MultiplexerHandle, PortClosed, SubscriberPort};
