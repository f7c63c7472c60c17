//! One connection interface for a tab, whichever way it is backed.
//!
//! # Two strategies, chosen once
//!
//! ```text
//!                    ┌──────────────────────┐
//!  ConnectionFacade ─┤ SharedConnection     │── port ──▶ multiplexer task
//!                    │   (or)               │
//!                    │ PrivateConnection    │── own session ──▶ hub
//!                    └──────────────────────┘
//! ```
//!
//! The facade is built with exactly one [`ConnectionStrategy`] and never
//! switches.  Callers see the same API either way; the only observable
//! difference is that a shared `connect()` returns as soon as the request
//! is posted, while a private `connect()` waits for the first handshake.
//! Neither return value is authoritative: state listeners are.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use notify_core::{ClientActivity, ConnectionState, ListenerId, ListenerRegistry};
use notify_worker::TransportError;

use crate::application::keep_alive::StateAnnouncer;

// ── Errors ────────────────────────────────────────────────────────────────────

/// `connect()` did not reach `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The first connection attempt failed.
    #[error("could not connect to the hub: {0}")]
    Transport(TransportError),

    /// The session closed before the handshake completed.
    #[error("connection closed before it was established")]
    Closed,

    /// `disconnect()` was called while the connect was pending.
    #[error("connect cancelled by disconnect")]
    Cancelled,

    /// Automatic reconnect ran out of attempts while the connect was pending.
    #[error("reconnect attempts exhausted")]
    GaveUp,

    /// The task behind this facade has stopped.
    #[error("connection task is no longer running")]
    Unavailable,
}

/// A client state announcement could not be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnnounceError {
    #[error("not connected")]
    NotConnected,
    #[error("connection task is no longer running")]
    Unavailable,
}

// ── Strategy seam ─────────────────────────────────────────────────────────────

/// How a facade is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Shared,
    Private,
}

/// The operations a facade delegates.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    async fn connect(&self) -> Result<(), ConnectError>;

    async fn disconnect(&self);

    async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError>;
}

// ── Observers ─────────────────────────────────────────────────────────────────

/// What a facade's listeners hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum FacadeEvent {
    Notification(Value),
    StateChange(ConnectionState),
}

/// Where strategies deliver notifications and state changes.
///
/// Shared by the facade (which registers listeners) and its strategy
/// (which publishes).  Both listener kinds live in one registry so that
/// every [`ListenerId`] is unique across them.
pub struct Observers {
    listeners: ListenerRegistry<FacadeEvent>,
    current: watch::Sender<ConnectionState>,
}

impl Observers {
    pub fn new() -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            current: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    pub fn publish_notification(&self, data: Value) {
        self.listeners.notify(&FacadeEvent::Notification(data));
    }

    /// Records `state` and tells listeners.  Repeats of the current state
    /// are swallowed.
    pub fn publish_state(&self, state: ConnectionState) {
        let previous = self.current.send_replace(state);
        if previous != state {
            self.listeners.notify(&FacadeEvent::StateChange(state));
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.current.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.current.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listeners.len())
            .field("current", &self.current())
            .finish()
    }
}

// ── Facade ────────────────────────────────────────────────────────────────────

/// The per-tab connection API.
pub struct ConnectionFacade {
    strategy: Box<dyn ConnectionStrategy>,
    observers: Arc<Observers>,
}

impl ConnectionFacade {
    /// `observers` must be the instance `strategy` publishes to.
    pub fn new(strategy: Box<dyn ConnectionStrategy>, observers: Arc<Observers>) -> Self {
        Self {
            strategy,
            observers,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.strategy.mode()
    }

    /// Requests a connection.  Watch [`on_state_change`](Self::on_state_change)
    /// for the outcome.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.strategy.connect().await
    }

    pub async fn disconnect(&self) {
        self.strategy.disconnect().await;
    }

    /// Registers a callback for every notification payload.
    pub fn on_notification<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.observers.listeners.add(move |event| {
            if let FacadeEvent::Notification(data) = event {
                callback(data);
            }
        })
    }

    /// Registers a callback for every state change.
    pub fn on_state_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.observers.listeners.add(move |event| {
            if let FacadeEvent::StateChange(state) = event {
                callback(state);
            }
        })
    }

    /// Removes a listener added by either `on_*` method.  Idempotent.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.observers.listeners.remove(id)
    }

    pub fn current_state(&self) -> ConnectionState {
        self.observers.current()
    }

    /// A receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.observers.watch()
    }

    /// Sends a best-effort client state announcement.
    pub async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError> {
        self.strategy.announce(activity).await
    }
}

impl std::fmt::Debug for ConnectionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFacade")
            .field("mode", &self.mode())
            .field("observers", &self.observers)
            .finish()
    }
}

#[async_trait]
impl StateAnnouncer for ConnectionFacade {
    fn is_connected(&self) -> bool {
        self.current_state().is_connected()
    }

    async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError> {
        ConnectionFacade::announce(self, activity).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
