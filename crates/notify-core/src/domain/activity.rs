//! Client activity reported upstream by the adaptive keep-alive.

use serde::{Deserialize, Serialize};

/// Whether the user is currently interacting with the client.
///
/// Sent to the hub as the single string argument of the client state
/// announcement (`"active"` / `"idle"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientActivity {
    Active,
    Idle,
}

impl ClientActivity {
    pub fn from_active(is_active: bool) -> Self {
        if is_active {
            Self::Active
        } else {
            Self::Idle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for ClientActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
