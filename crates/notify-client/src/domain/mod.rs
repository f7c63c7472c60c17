//! Domain layer for notify-client.
//!
//! Pure configuration and input vocabulary.  No sockets, no timers.

pub mod config;
pub mod input;

pub use config::{ClientConfig, ConfigError};
pub use input::InputKind;
