//! The multiplexer task and the handles other contexts use to reach it.
//!
//! [`spawn_multiplexer`] moves a [`Multiplexer`] onto its own tokio task and
//! returns a cloneable [`MultiplexerHandle`].  Each consumer (one per tab)
//! calls [`MultiplexerHandle::connect_port`] to get a [`SubscriberPort`]:
//!
//! ```text
//!   SubscriberPort ──PortMessage──▶ ┌──────────────────┐
//!   SubscriberPort ──PortMessage──▶ │ multiplexer task │ ──▶ hub session
//!                  ◀─WorkerMessage─ └──────────────────┘
//! ```
//!
//! Dropping a port unregisters it, so a consumer that goes away without
//! saying goodbye still releases its share of the connection.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use notify_core::{PortMessage, SubscriberId, WorkerMessage};

use crate::application::multiplexer::{MuxEvent, Multiplexer};
use crate::domain::{Connector, MultiplexerConfig};
use crate::infrastructure::hub_transport::HubConnector;

/// The multiplexer task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("multiplexer is no longer running")]
pub struct PortClosed;

/// Starts a multiplexer on the current tokio runtime.
///
/// # Panics
///
/// Panics if called outside a tokio runtime, like `tokio::spawn`.
pub fn spawn_multiplexer(config: MultiplexerConfig, connector: Arc<dyn Connector>) -> MultiplexerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let multiplexer = Multiplexer::new(config, connector, tx.clone());
    tokio::spawn(multiplexer.run(rx));
    MultiplexerHandle { events: tx }
}

/// Cloneable handle to a running multiplexer.
#[derive(Debug, Clone)]
pub struct MultiplexerHandle {
    events: UnboundedSender<MuxEvent>,
}

impl MultiplexerHandle {
    /// Starts a multiplexer that talks to a real hub.
    pub fn spawn(config: MultiplexerConfig) -> Self {
        let connector = HubConnector::new(config.handshake_timeout);
        spawn_multiplexer(config, Arc::new(connector))
    }

    /// Registers a new subscriber.  The multiplexer immediately pushes its
    /// current state to the port.
    pub fn connect_port(&self) -> Result<SubscriberPort, PortClosed> {
        let id = SubscriberId::new();
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.events
            .send(MuxEvent::Register {
                id,
                outbox: outbox.clone(),
            })
            .map_err(|_| PortClosed)?;
        debug!(subscriber = %id, "port connected");
        Ok(SubscriberPort {
            id,
            events: self.events.clone(),
            outbox,
            inbox: Some(inbox),
        })
    }

    /// Tears down the session and timers and ends the task.  Ports still
    /// alive afterwards get [`PortClosed`] from every call.
    pub fn shutdown(&self) {
        let _ = self.events.send(MuxEvent::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }
}

/// One subscriber's end of the multiplexer.
#[derive(Debug)]
pub struct SubscriberPort {
    id: SubscriberId,
    events: UnboundedSender<MuxEvent>,
    /// Kept so the port can register again after a `Disconnect`.
    outbox: UnboundedSender<WorkerMessage>,
    inbox: Option<UnboundedReceiver<WorkerMessage>>,
}

impl SubscriberPort {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Posts a message to the multiplexer.
    pub fn post(&self, message: PortMessage) -> Result<(), PortClosed> {
        self.events
            .send(MuxEvent::Port { id: self.id, message })
            .map_err(|_| PortClosed)
    }

    /// Registers this port again after a `Disconnect`.  Registering a port
    /// that is already registered just re-sends the current state.
    pub fn register(&self) -> Result<(), PortClosed> {
        self.events
            .send(MuxEvent::Register {
                id: self.id,
                outbox: self.outbox.clone(),
            })
            .map_err(|_| PortClosed)
    }

    /// Takes the receiving side, e.g. to move it into a pump task.
    /// Returns `None` after the first call.
    pub fn take_inbox(&mut self) -> Option<UnboundedReceiver<WorkerMessage>> {
        self.inbox.take()
    }

    /// Next message from the multiplexer.  `None` once the inbox has been
    /// taken or the multiplexer is gone.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        match self.inbox.as_mut() {
            Some(inbox) => inbox.recv().await,
            None => None,
        }
    }
}

impl Drop for SubscriberPort {
    fn drop(&mut self) {
        let _ = self.events.send(MuxEvent::Unregister { id: self.id });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionEvent;
    use crate::infrastructure::mock::MockHubConnector;
    use notify_core::ConnectionState;
    use std::time::Duration;

    async fn expect_state(port: &mut SubscriberPort, state: ConnectionState) {
        let message = tokio::time::timeout(Duration::from_secs(1), port.recv())
            .await
            .expect("message within a second")
            .expect("port open");
        assert_eq!(message, WorkerMessage::StateChange { state });
    }

    #[tokio::test]
    async fn test_connect_port_receives_initial_state() {
        let handle = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(MockHubConnector::new()));
        let mut port = handle.connect_port().unwrap();
        expect_state(&mut port, ConnectionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_dropping_last_port_closes_session() {
        // Arrange
        let connector = MockHubConnector::new();
        let handle = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
        let mut port = handle.connect_port().unwrap();
        port.post(PortMessage::Init { hub_url: "http://hub".into() }).unwrap();
        expect_state(&mut port, ConnectionState::Disconnected).await;
        expect_state(&mut port, ConnectionState::Connecting).await;
        connector.emit(0, SessionEvent::Opened);
        expect_state(&mut port, ConnectionState::Connected).await;

        // Act
        drop(port);
        let mut last = handle.connect_port().unwrap();
        // Ports are served in order, so once the last port hears back the
        // unregister has been applied.
        expect_state(&mut last, ConnectionState::Disconnected).await;

        // Assert
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task_and_closes_ports() {
        let handle = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(MockHubConnector::new()));
        let mut port = handle.connect_port().unwrap();
        expect_state(&mut port, ConnectionState::Disconnected).await;

        handle.shutdown();

        // The task drops its receiver when it ends.
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task stops");
        assert_eq!(port.post(PortMessage::Disconnect), Err(PortClosed));
        assert!(handle.connect_port().is_err());
    }

    #[tokio::test]
    async fn test_take_inbox_only_once() {
        let handle = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(MockHubConnector::new()));
        let mut port = handle.connect_port().unwrap();
        assert!(port.take_inbox().is_some());
        assert!(port.take_inbox().is_none());
        assert_eq!(port.recv().await, None);
    }
}
