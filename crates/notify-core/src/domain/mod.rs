//! Pure domain types shared by the worker and client crates.
//!
//! Nothing in here performs I/O or depends on an async runtime, which keeps
//! the state machine vocabulary trivially testable.

pub mod activity;
pub mod listeners;
pub mod port;
pub mod reconnect;
pub mod state;

pub use activity::ClientActivity;
pub use listeners::{ListenerId, ListenerRegistry};
pub use port::{PortMessage, SubscriberId, WorkerMessage};
pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;
