//! Infrastructure layer for notify-worker.
//!
//! - [`hub_transport`]: the production [`Connector`](crate::domain::Connector)
//!   (negotiate with `reqwest`, stream with `tokio-tungstenite`).
//! - [`runtime`]: spawns the multiplexer task and hands out subscriber ports.
//! - [`mock`]: a recording connector for tests in this and dependent crates.

pub mod hub_transport;
pub mod mock;
pub mod runtime;

pub use hub_transport::HubConnector;
pub use mock::{MockHubConnector, MockHubSession};
pub use runtime::{spawn_multiplexer, MultiplexerHandle, PortClosed, SubscriberPort};
