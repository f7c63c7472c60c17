//! Messages exchanged between subscriber contexts and the multiplexer.
//!
//! # Why message passing? (for beginners)
//!
//! The multiplexer's subscriber set and connection state are owned by a
//! single task.  Subscribers never touch that state directly; they post a
//! [`PortMessage`] and the multiplexer answers with [`WorkerMessage`]s.
//! Because only one task ever mutates the shared connection, no locks are
//! needed around it.
//!
//! Both enums are serde-tagged so the same protocol can cross a real process
//! or worker boundary as JSON:
//!
//! ```text
//! {"type":"init","hubUrl":"https://example.org/hubs/notifications"}
//! {"type":"disconnect"}
//! {"type":"announce","state":"idle"}
//! {"type":"notification","data":{...}}
//! {"type":"stateChange","state":"connected"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::activity::ClientActivity;
use crate::domain::state::ConnectionState;

/// Identity of one subscriber port.
///
/// Minted when the port is opened; the multiplexer keys its subscriber set
/// by this value, so two ports are never confused even if one reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscriber → multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PortMessage {
    /// Start (or join) the shared connection to `hub_url`.
    Init {
        #[serde(rename = "hubUrl")]
        hub_url: String,
    },
    /// This subscriber is no longer interested.
    Disconnect,
    /// Best-effort client state announcement forwarded to the hub.
    Announce { state: ClientActivity },
}

/// Multiplexer → subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// The first argument of a notification invocation, unmodified.
    Notification { data: Value },
    /// The multiplexer's authoritative connection state.
    StateChange { state: ConnectionState },
}
