//! Connection state shared by the multiplexer and every facade.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the hub connection.
///
/// ```text
/// Disconnected ─▶ Connecting ─▶ Connected ─▶ Reconnecting ─▶ Connecting
///                     │                            │
///                     └────────▶ Failed ◀──────────┘ (no subscribers left)
/// ```
///
/// `Disconnected` and `Failed` are both terminal until the next `init`.
/// `Failed` means the connection never worked; `Disconnected` means it was
/// shut down or lost after working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
