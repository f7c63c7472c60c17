//! TOML configuration for the notification client.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration and older files keep loading when fields are added.
//!
//! ```toml
//! hub_url = "https://example.org/hubs/notifications"
//! shared = true
//! tabs = 2
//!
//! [activity]
//! idle_threshold_secs = 120
//! check_interval_secs = 10
//!
//! [keep_alive]
//! active_interval_secs = 30
//! idle_interval_secs = 180
//!
//! [connection]
//! ping_interval_secs = 15
//! handshake_timeout_secs = 15
//! notification_target = "ReceiveNotification"
//! client_state_target = "UpdateClientState"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use notify_core::ReconnectPolicy;
use notify_worker::MultiplexerConfig;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Hub endpoint, `http(s)://host/path`.  Empty means "must be given on
    /// the command line".
    #[serde(default)]
    pub hub_url: String,
    /// Use one shared connection for all tabs when `true`; one private
    /// connection per tab otherwise.
    #[serde(default = "default_true")]
    pub shared: bool,
    /// Number of simulated tabs.
    #[serde(default = "default_tabs")]
    pub tabs: usize,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Activity detector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityConfig {
    /// No input for this long marks the tab idle.
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    /// How often the idle check runs.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

/// Client state announcement intervals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeepAliveConfig {
    #[serde(default = "default_active_interval_secs")]
    pub active_interval_secs: u64,
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
}

/// Hub protocol settings shared by both connection modes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_notification_target")]
    pub notification_target: String,
    #[serde(default = "default_client_state_target")]
    pub client_state_target: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_tabs() -> usize {
    1
}
fn default_idle_threshold_secs() -> u64 {
    120
}
fn default_check_interval_secs() -> u64 {
    10
}
fn default_active_interval_secs() -> u64 {
    30
}
fn default_idle_interval_secs() -> u64 {
    180
}
fn default_ping_interval_secs() -> u64 {
    15
}
fn default_handshake_timeout_secs() -> u64 {
    15
}
fn default_notification_target() -> String {
    notify_worker::domain::config::DEFAULT_NOTIFICATION_TARGET.to_string()
}
fn default_client_state_target() -> String {
    notify_worker::domain::config::DEFAULT_CLIENT_STATE_TARGET.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: String::new(),
            shared: default_true(),
            tabs: default_tabs(),
            activity: ActivityConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: default_idle_threshold_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            active_interval_secs: default_active_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            notification_target: default_notification_target(),
            client_state_target: default_client_state_target(),
        }
    }
}

// ── Loading and conversion ────────────────────────────────────────────────────

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for zero intervals or zero tabs.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads the file at `path`.  A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found",
    /// otherwise as [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tabs == 0 {
            return Err(ConfigError::Invalid("tabs must be at least 1".to_string()));
        }
        let intervals = [
            ("activity.idle_threshold_secs", self.activity.idle_threshold_secs),
            ("activity.check_interval_secs", self.activity.check_interval_secs),
            ("keep_alive.active_interval_secs", self.keep_alive.active_interval_secs),
            ("keep_alive.idle_interval_secs", self.keep_alive.idle_interval_secs),
            ("connection.ping_interval_secs", self.connection.ping_interval_secs),
            ("connection.handshake_timeout_secs", self.connection.handshake_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Settings for the shared multiplexer (unbounded reconnect).
    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            notification_target: self.connection.notification_target.clone(),
            client_state_target: self.connection.client_state_target.clone(),
            ping_interval: Duration::from_secs(self.connection.ping_interval_secs),
            handshake_timeout: Duration::from_secs(self.connection.handshake_timeout_secs),
            reconnect_policy: ReconnectPolicy::shared_default(),
        }
    }

    /// Settings for a private per-tab connection.  Same protocol settings,
    /// but the bounded reconnect schedule of a stock hub client.
    pub fn private_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            reconnect_policy: ReconnectPolicy::hub_client_default(),
            ..self.multiplexer_config()
        }
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.activity.idle_threshold_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.activity.check_interval_secs)
    }

    pub fn active_announce_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive.active_interval_secs)
    }

    pub fn idle_announce_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive.idle_interval_secs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
