//! notify-client library crate.
//!
//! The per-tab side of the shared hub connection: the connection facade a
//! tab talks to, the activity detector, and the adaptive keep-alive that
//! tells the hub whether the user is active.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Tab code (listeners, input events)
//!         ↕
//! [notify-client]
//!   ├── domain/           ClientConfig (TOML), InputKind
//!   ├── application/      ConnectionFacade, ActivityDetector, AdaptiveKeepAlive
//!   └── infrastructure/
//!         ├── shared/     SharedConnection: a port on the notify-worker multiplexer
//!         └── private/    PrivateConnection: one hub session for this tab only
//!         ↕
//! Hub
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` only knows the [`ConnectionStrategy`] trait; it never
//!   sees ports or sessions.
//! - `infrastructure` picks and builds the strategy ([`HubAccess`]).
//!
//! [`ConnectionStrategy`]: application::ConnectionStrategy
//! [`HubAccess`]: infrastructure::HubAccess

/// Domain layer: configuration and input vocabulary.
pub mod domain;

/// Application layer: facade, activity detection and keep-alive.
pub mod application;

/// Infrastructure layer: the shared and private connection strategies.
pub mod infrastructure;
