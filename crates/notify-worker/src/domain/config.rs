//! Multiplexer configuration types.
//!
//! [`MultiplexerConfig`] is a plain struct with no global state and no
//! environment reads, so tests can build as many independent multiplexers
//! as they like.  Binaries populate it from CLI arguments or a config file.

use std::time::Duration;

use notify_core::ReconnectPolicy;

/// Invocation target the hub uses to deliver a notification.
pub const DEFAULT_NOTIFICATION_TARGET: &str = "ReceiveNotification";

/// Hub method that receives client state announcements.
pub const DEFAULT_CLIENT_STATE_TARGET: &str = "UpdateClientState";

/// All runtime configuration for one multiplexer.
///
/// # Example
///
/// ```rust
/// use notify_worker::MultiplexerConfig;
///
/// let cfg = MultiplexerConfig::default();
/// assert_eq!(cfg.ping_interval.as_secs(), 15);
/// ```
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Invocations with this target are fanned out to every subscriber.
    /// All other targets are ignored.
    pub notification_target: String,

    /// Target of the best-effort `announce` invocation.
    pub client_state_target: String,

    /// How often a `Ping` frame is sent while connected.
    ///
    /// This is the transport-level liveness ping, not the activity-driven
    /// client state announcement.
    pub ping_interval: Duration,

    /// Upper bound for negotiate + socket open + handshake.
    pub handshake_timeout: Duration,

    /// Backoff schedule used while at least one subscriber is waiting.
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for MultiplexerConfig {
    /// | Field                | Default                      |
    /// |----------------------|------------------------------|
    /// | notification_target  | `ReceiveNotification`        |
    /// | client_state_target  | `UpdateClientState`          |
    /// | ping_interval        | 15 seconds                   |
    /// | handshake_timeout    | 15 seconds                   |
    /// | reconnect_policy     | 0, 2, 5, 10, 30 s, unbounded |
    fn default() -> Self {
        Self {
            notification_target: DEFAULT_NOTIFICATION_TARGET.to_string(),
            client_state_target: DEFAULT_CLIENT_STATE_TARGET.to_string(),
            ping_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(15),
            reconnect_policy: ReconnectPolicy::shared_default(),
        }
    }
}
