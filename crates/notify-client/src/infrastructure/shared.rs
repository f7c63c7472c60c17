//! The shared strategy: one subscriber port on the multiplexer.
//!
//! Every facade operation becomes a [`PortMessage`].  A pump task reads the
//! port's inbox and republishes what the multiplexer says to the facade's
//! [`Observers`], so state listeners see the multiplexer's authoritative
//! state rather than a local guess.
//!
//! `disconnect()` unregisters the port but keeps it, so a later `connect()`
//! can register it again without minting a new subscriber id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

use notify_core::{ClientActivity, ConnectionState, PortMessage, WorkerMessage};
use notify_worker::{MultiplexerHandle, PortClosed, SubscriberPort};

use crate::application::facade::{
    AnnounceError, ConnectError, ConnectionMode, ConnectionStrategy, Observers,
};

pub struct SharedConnection {
    hub_url: String,
    port: SubscriberPort,
    /// `false` between `disconnect()` and the next `connect()`.  The pump
    /// drops whatever is still queued from the multiplexer while detached.
    attached: Arc<AtomicBool>,
    observers: Arc<Observers>,
    pump: JoinHandle<()>,
}

impl SharedConnection {
    /// Opens a port on `multiplexer`.  Nothing is sent to the hub until
    /// [`connect`](ConnectionStrategy::connect).
    pub fn open(
        multiplexer: &MultiplexerHandle,
        hub_url: impl Into<String>,
        observers: Arc<Observers>,
    ) -> Result<Self, PortClosed> {
        let mut port = multiplexer.connect_port()?;
        let inbox = port.take_inbox().ok_or(PortClosed)?;
        let attached = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(pump(inbox, Arc::clone(&attached), Arc::clone(&observers)));
        Ok(Self {
            hub_url: hub_url.into(),
            port,
            attached,
            observers,
            pump,
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

async fn pump(
    mut inbox: UnboundedReceiver<WorkerMessage>,
    attached: Arc<AtomicBool>,
    observers: Arc<Observers>,
) {
    while let Some(message) = inbox.recv().await {
        if !attached.load(Ordering::SeqCst) {
            debug!(?message, "port detached; dropping message");
            continue;
        }
        match message {
            WorkerMessage::Notification { data } => observers.publish_notification(data),
            WorkerMessage::StateChange { state } => observers.publish_state(state),
        }
    }
    debug!("multiplexer closed the port");
}

#[async_trait]
impl ConnectionStrategy for SharedConnection {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Shared
    }

    /// Posts `init`.  Returns as soon as the message is queued; the outcome
    /// arrives through the state listeners.
    async fn connect(&self) -> Result<(), ConnectError> {
        if !self.attached.swap(true, Ordering::SeqCst) {
            self.port.register().map_err(|_| ConnectError::Unavailable)?;
        }
        self.port
            .post(PortMessage::Init {
                hub_url: self.hub_url.clone(),
            })
            .map_err(|_| ConnectError::Unavailable)
    }

    async fn disconnect(&self) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.port.post(PortMessage::Disconnect).is_err() {
            debug!("multiplexer already gone");
        }
        // The port no longer hears from the multiplexer, so settle locally.
        self.observers.publish_state(ConnectionState::Disconnected);
    }

    async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError> {
        if !self.is_attached() || !self.observers.current().is_connected() {
            return Err(AnnounceError::NotConnected);
        }
        self.port
            .post(PortMessage::Announce { state: activity })
            .map_err(|_| AnnounceError::Unavailable)
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        self.pump.abort();
        // Dropping `port` unregisters it.
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("hub_url", &self.hub_url)
            .field("subscriber", &self.port.id())
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::facade::ConnectionFacade;
    use notify_core::{InvocationFrame, ProtocolFrame};
    use notify_worker::infrastructure::mock::MockHubConnector;
    use notify_worker::{spawn_multiplexer, MultiplexerConfig, SessionEvent};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const HUB: &str = "https://hub.example/notifications";

    fn shared_facade(multiplexer: &MultiplexerHandle) -> ConnectionFacade {
        let observers = Arc::new(Observers::new());
        let strategy = SharedConnection::open(multiplexer, HUB, Arc::clone(&observers)).unwrap();
        ConnectionFacade::new(Box::new(strategy), observers)
    }

    async fn wait_for_state(facade: &ConnectionFacade, state: ConnectionState) {
        let mut rx = facade.watch_state();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("facade never reached {state}"))
            .expect("observers alive");
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition reached within a second");
    }

    fn notification(data: Value) -> SessionEvent {
        SessionEvent::Frame(ProtocolFrame::Invocation(InvocationFrame::new(
            "ReceiveNotification",
            vec![data],
        )))
    }

    #[tokio::test]
    async fn test_two_facades_share_one_session() {
        // Arrange
        let connector = MockHubConnector::new();
        let multiplexer = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
        let first = shared_facade(&multiplexer);
        let second = shared_facade(&multiplexer);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for facade in [&first, &second] {
            let tx = tx.clone();
            facade.on_notification(move |data| {
                let _ = tx.send(data.clone());
            });
        }

        // Act
        first.connect().await.unwrap();
        second.connect().await.unwrap();
        wait_for_state(&second, ConnectionState::Connecting).await;
        connector.emit(0, SessionEvent::Opened);
        wait_for_state(&first, ConnectionState::Connected).await;
        wait_for_state(&second, ConnectionState::Connected).await;
        connector.emit(0, notification(json!({"id": 7})));

        // Assert: one socket, and both tabs got the payload.
        assert_eq!(connector.open_count(), 1);
        for _ in 0..2 {
            let data = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(data, json!({"id": 7}));
        }
    }

    #[tokio::test]
    async fn test_last_disconnect_releases_session() {
        let connector = MockHubConnector::new();
        let multiplexer = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
        let first = shared_facade(&multiplexer);
        let second = shared_facade(&multiplexer);
        first.connect().await.unwrap();
        wait_for_state(&first, ConnectionState::Connecting).await;
        connector.emit(0, SessionEvent::Opened);
        wait_for_state(&second, ConnectionState::Connected).await;

        first.disconnect().await;
        assert_eq!(first.current_state(), ConnectionState::Disconnected);
        assert_eq!(second.current_state(), ConnectionState::Connected);
        assert_eq!(connector.open_sessions(), 1);

        second.disconnect().await;
        until(|| connector.open_sessions() == 0).await;
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_rejoins() {
        let connector = MockHubConnector::new();
        let multiplexer = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
        let anchor = shared_facade(&multiplexer);
        let facade = shared_facade(&multiplexer);
        anchor.connect().await.unwrap();
        wait_for_state(&anchor, ConnectionState::Connecting).await;
        connector.emit(0, SessionEvent::Opened);
        wait_for_state(&facade, ConnectionState::Connected).await;

        facade.disconnect().await;
        facade.connect().await.unwrap();

        // Registration pushes the current state; no second session.
        wait_for_state(&facade, ConnectionState::Connected).await;
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_announce_is_forwarded_only_when_connected() {
        let connector = MockHubConnector::new();
        let multiplexer = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
        let facade = shared_facade(&multiplexer);

        assert_eq!(
            facade.announce(ClientActivity::Idle).await,
            Err(AnnounceError::NotConnected)
        );

        facade.connect().await.unwrap();
        wait_for_state(&facade, ConnectionState::Connecting).await;
        connector.emit(0, SessionEvent::Opened);
        wait_for_state(&facade, ConnectionState::Connected).await;
        facade.announce(ClientActivity::Idle).await.unwrap();

        let expected = ProtocolFrame::Invocation(InvocationFrame::new(
            "UpdateClientState",
            vec![json!("idle")],
        ));
        until(|| connector.sent_frames(0).contains(&expected)).await;
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_is_unavailable() {
        let multiplexer = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(MockHubConnector::new()));
        let facade = shared_facade(&multiplexer);

        multiplexer.shutdown();
        until(|| !multiplexer.is_running()).await;

        assert_eq!(facade.connect().await, Err(ConnectError::Unavailable));
    }
}
