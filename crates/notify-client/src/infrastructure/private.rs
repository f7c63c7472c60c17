//! The fallback strategy: a private hub session for one tab.
//!
//! Used when no shared multiplexer is available.  The strategy runs its own
//! small actor, so it has the same shape as the multiplexer with a single
//! implicit subscriber:
//!
//! ```text
//!  facade calls ─┐
//!  session events ├──▶ mpsc ──▶ PrivateActor::handle ──▶ Observers
//!  timer expiries ┘
//! ```
//!
//! It behaves like a stock hub client with automatic reconnect:
//!
//! - `connect()` waits for the first handshake.  If that attempt fails the
//!   state is `Failed` and the error is returned; there is no retry.
//! - A connection lost after `Connected` is retried on the bounded schedule
//!   of the configured [`ReconnectPolicy`](notify_core::ReconnectPolicy).
//!   Once the schedule runs out the state settles on `Disconnected`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use notify_core::{ClientActivity, ConnectionState, InvocationFrame, ProtocolFrame};
use notify_worker::{Connector, EventCallback, MultiplexerConfig, Session, SessionEvent, TransportError};

use crate::application::facade::{
    AnnounceError, ConnectError, ConnectionMode, ConnectionStrategy, Observers,
};

type ConnectReply = oneshot::Sender<Result<(), ConnectError>>;

#[derive(Debug)]
enum PrivateEvent {
    Connect { reply: ConnectReply },
    Disconnect { done: oneshot::Sender<()> },
    Announce {
        activity: ClientActivity,
        reply: oneshot::Sender<Result<(), AnnounceError>>,
    },
    Session { generation: u64, event: SessionEvent },
    ReconnectDue { timer: u64 },
    PingDue { timer: u64 },
}

/// Handle to the actor.  Dropping it closes the session.
pub struct PrivateConnection {
    events: UnboundedSender<PrivateEvent>,
    task: JoinHandle<()>,
}

impl PrivateConnection {
    /// Starts the actor on the current tokio runtime.  No session is opened
    /// until [`connect`](ConnectionStrategy::connect).
    pub fn spawn(
        hub_url: impl Into<String>,
        config: MultiplexerConfig,
        connector: Arc<dyn Connector>,
        observers: Arc<Observers>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = PrivateActor::new(hub_url.into(), config, connector, observers, tx.clone());
        let task = tokio::spawn(actor.run(rx));
        Self { events: tx, task }
    }
}

#[async_trait]
impl ConnectionStrategy for PrivateConnection {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Private
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        let (reply, outcome) = oneshot::channel();
        self.events
            .send(PrivateEvent::Connect { reply })
            .map_err(|_| ConnectError::Unavailable)?;
        outcome.await.unwrap_or(Err(ConnectError::Unavailable))
    }

    async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        if self.events.send(PrivateEvent::Disconnect { done }).is_ok() {
            let _ = finished.await;
        }
    }

    async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError> {
        let (reply, outcome) = oneshot::channel();
        self.events
            .send(PrivateEvent::Announce { activity, reply })
            .map_err(|_| AnnounceError::Unavailable)?;
        outcome.await.unwrap_or(Err(AnnounceError::Unavailable))
    }
}

impl Drop for PrivateConnection {
    fn drop(&mut self) {
        // Aborting drops the actor, whose own Drop closes the session.
        self.task.abort();
    }
}

impl std::fmt::Debug for PrivateConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateConnection")
            .field("running", &!self.task.is_finished())
            .finish()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// A spawned timer task.  Dropping it cancels the timer.
struct Timer {
    id: u64,
    task: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PrivateActor {
    hub_url: String,
    config: MultiplexerConfig,
    connector: Arc<dyn Connector>,
    observers: Arc<Observers>,
    events: UnboundedSender<PrivateEvent>,

    state: ConnectionState,
    session: Option<Box<dyn Session>>,
    session_generation: u64,
    attempt_count: u32,
    /// Whether the current `connect()` run has reached `Connected` yet.
    /// Decides between "initial failure" and "lost connection".
    connected_once: bool,
    last_error: Option<TransportError>,
    waiters: Vec<ConnectReply>,

    reconnect_timer: Option<Timer>,
    ping_timer: Option<Timer>,
    next_timer_id: u64,
}

impl PrivateActor {
    fn new(
        hub_url: String,
        config: MultiplexerConfig,
        connector: Arc<dyn Connector>,
        observers: Arc<Observers>,
        events: UnboundedSender<PrivateEvent>,
    ) -> Self {
        Self {
            hub_url,
            config,
            connector,
            observers,
            events,
            state: ConnectionState::Disconnected,
            session: None,
            session_generation: 0,
            attempt_count: 0,
            connected_once: false,
            last_error: None,
            waiters: Vec::new(),
            reconnect_timer: None,
            ping_timer: None,
            next_timer_id: 0,
        }
    }

    async fn run(mut self, mut events: UnboundedReceiver<PrivateEvent>) {
        debug!(hub = %self.hub_url, "private connection started");
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: PrivateEvent) {
        match event {
            PrivateEvent::Connect { reply } => self.connect(reply),
            PrivateEvent::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
            PrivateEvent::Announce { activity, reply } => {
                let _ = reply.send(self.announce(activity));
            }
            PrivateEvent::Session { generation, event } => self.on_session_event(generation, event),
            PrivateEvent::ReconnectDue { timer } => self.on_reconnect_due(timer),
            PrivateEvent::PingDue { timer } => self.on_ping_due(timer),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "private connection state changed");
        self.state = state;
        self.observers.publish_state(state);
    }

    fn resolve_waiters(&mut self, outcome: Result<(), ConnectError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn connect(&mut self, reply: ConnectReply) {
        match self.state {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => self.waiters.push(reply),
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.waiters.push(reply);
                self.attempt_count = 0;
                self.connected_once = false;
                self.last_error = None;
                self.open_session();
            }
        }
    }

    fn disconnect(&mut self) {
        self.teardown();
        self.resolve_waiters(Err(ConnectError::Cancelled));
        self.set_state(ConnectionState::Disconnected);
    }

    fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError> {
        match &self.session {
            Some(session) if self.state.is_connected() => {
                let frame = ProtocolFrame::Invocation(InvocationFrame::new(
                    self.config.client_state_target.clone(),
                    vec![Value::String(activity.as_str().to_string())],
                ));
                session.send(&frame);
                Ok(())
            }
            _ => Err(AnnounceError::NotConnected),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    fn open_session(&mut self) {
        self.reconnect_timer = None;
        self.ping_timer = None;

        self.session_generation += 1;
        let generation = self.session_generation;
        let events = self.events.clone();
        let on_event: EventCallback = Box::new(move |event| {
            let _ = events.send(PrivateEvent::Session { generation, event });
        });

        debug!(hub = %self.hub_url, generation, attempt = self.attempt_count, "opening private hub session");
        self.session = Some(self.connector.open(&self.hub_url, on_event));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_session_event(&mut self, generation: u64, event: SessionEvent) {
        if generation != self.session_generation || self.session.is_none() {
            debug!(generation, current = self.session_generation, "stale session event ignored");
            return;
        }
        match event {
            SessionEvent::Opened => {
                self.attempt_count = 0;
                self.connected_once = true;
                self.last_error = None;
                self.arm_ping_timer();
                self.set_state(ConnectionState::Connected);
                self.resolve_waiters(Ok(()));
            }
            SessionEvent::Frame(frame) => self.on_frame(frame),
            SessionEvent::Error(e) => {
                warn!("private hub session error: {e}");
                self.last_error = Some(e);
            }
            SessionEvent::Closed => self.on_session_closed(),
        }
    }

    fn on_frame(&mut self, frame: ProtocolFrame) {
        match frame {
            ProtocolFrame::Invocation(invocation) => {
                if invocation.target != self.config.notification_target {
                    debug!(invocation_target = %invocation.target, "ignoring invocation for unhandled target");
                    return;
                }
                let data = invocation.arguments.into_iter().next().unwrap_or(Value::Null);
                self.observers.publish_notification(data);
            }
            ProtocolFrame::Ping => {
                if let Some(session) = &self.session {
                    session.send(&ProtocolFrame::Ping);
                }
            }
            ProtocolFrame::Close(close) => {
                info!(error = ?close.error, "hub requested close");
                if let Some(session) = self.session.as_mut() {
                    session.close();
                }
            }
            other => debug!(kind = other.kind_name(), "ignoring frame"),
        }
    }

    fn on_session_closed(&mut self) {
        self.ping_timer = None;
        self.session = None;

        if !self.connected_once {
            let error = match self.last_error.take() {
                Some(e) => ConnectError::Transport(e),
                None => ConnectError::Closed,
            };
            warn!("initial connection failed: {error}");
            self.set_state(ConnectionState::Failed);
            self.resolve_waiters(Err(error));
            return;
        }

        match self.config.reconnect_policy.next_delay(self.attempt_count) {
            Some(delay) => {
                info!(attempt = self.attempt_count, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.attempt_count += 1;
                self.arm_reconnect_timer(delay);
                self.set_state(ConnectionState::Reconnecting);
            }
            None => {
                warn!(attempts = self.attempt_count, "reconnect attempts exhausted; giving up");
                self.set_state(ConnectionState::Disconnected);
                self.resolve_waiters(Err(ConnectError::GaveUp));
            }
        }
    }

    fn on_reconnect_due(&mut self, timer: u64) {
        if self.reconnect_timer.as_ref().map(|t| t.id) != Some(timer) {
            debug!(timer, "cancelled reconnect timer fired; ignoring");
            return;
        }
        self.reconnect_timer = None;
        self.open_session();
    }

    fn on_ping_due(&mut self, timer: u64) {
        if self.ping_timer.as_ref().map(|t| t.id) != Some(timer) {
            return;
        }
        if let Some(session) = &self.session {
            session.send(&ProtocolFrame::Ping);
        }
    }

    fn teardown(&mut self) {
        self.reconnect_timer = None;
        self.ping_timer = None;
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    fn take_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    fn arm_reconnect_timer(&mut self, delay: Duration) {
        let id = self.take_timer_id();
        let events = self.events.clone();
        let deadline = Instant::now() + delay;
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = events.send(PrivateEvent::ReconnectDue { timer: id });
        });
        self.reconnect_timer = Some(Timer { id, task });
    }

    fn arm_ping_timer(&mut self) {
        let id = self.take_timer_id();
        let events = self.events.clone();
        let period = self.config.ping_interval;
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let task = tokio::spawn(async move {
            loop {
                ticks.tick().await;
                if events.send(PrivateEvent::PingDue { timer: id }).is_err() {
                    break;
                }
            }
        });
        self.ping_timer = Some(Timer { id, task });
    }
}

impl Drop for PrivateActor {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::facade::ConnectionFacade;
    use notify_core::ReconnectPolicy;
    use notify_worker::infrastructure::mock::MockHubConnector;
    use serde_json::json;

    const HUB: &str = "https://hub.example/notifications";

    fn private_facade(connector: &MockHubConnector) -> Arc<ConnectionFacade> {
        let config = MultiplexerConfig {
            reconnect_policy: ReconnectPolicy::hub_client_default(),
            ..MultiplexerConfig::default()
        };
        let observers = Arc::new(Observers::new());
        let strategy = PrivateConnection::spawn(HUB, config, Arc::new(connector.clone()), Arc::clone(&observers));
        Arc::new(ConnectionFacade::new(Box::new(strategy), observers))
    }

    /// Starts `connect()` in the background.
    fn spawn_connect(facade: &Arc<ConnectionFacade>) -> JoinHandle<Result<(), ConnectError>> {
        let facade = Arc::clone(facade);
        tokio::spawn(async move { facade.connect().await })
    }

    /// Polls `condition`, letting the paused clock run between checks.
    async fn until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    async fn connected(connector: &MockHubConnector) -> Arc<ConnectionFacade> {
        let facade = private_facade(connector);
        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;
        connector.emit(0, SessionEvent::Opened);
        assert_eq!(pending.await.unwrap(), Ok(()));
        facade
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_resolves_after_handshake() {
        // Arrange
        let connector = MockHubConnector::new();

        // Act
        let facade = connected(&connector).await;

        // Assert
        assert_eq!(facade.current_state(), ConnectionState::Connected);
        assert_eq!(facade.mode(), ConnectionMode::Private);
        assert_eq!(connector.hub_url(0).as_deref(), Some(HUB));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_is_reported_and_not_retried() {
        let connector = MockHubConnector::new();
        let facade = private_facade(&connector);
        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;

        connector.emit(0, SessionEvent::Error(TransportError::Negotiate("refused".into())));
        connector.emit(0, SessionEvent::Closed);

        assert_eq!(
            pending.await.unwrap(),
            Err(ConnectError::Transport(TransportError::Negotiate("refused".into())))
        );
        assert_eq!(facade.current_state(), ConnectionState::Failed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_handshake_without_error() {
        let connector = MockHubConnector::new();
        let facade = private_facade(&connector);
        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;

        connector.emit(0, SessionEvent::Closed);

        assert_eq!(pending.await.unwrap(), Err(ConnectError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_can_be_retried_by_caller() {
        let connector = MockHubConnector::new();
        let facade = private_facade(&connector);
        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;
        connector.emit(0, SessionEvent::Closed);
        assert!(pending.await.unwrap().is_err());

        let retry = spawn_connect(&facade);
        until(|| connector.open_count() == 2).await;
        connector.emit(1, SessionEvent::Opened);

        assert_eq!(retry.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_follows_bounded_schedule_then_gives_up() {
        // Arrange
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;
        let states = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        facade.on_state_change(move |s| sink.lock().unwrap().push(*s));

        // Act: lose the connection, then fail every retry.
        connector.emit(0, SessionEvent::Closed);
        let mut gaps = Vec::new();
        for session in 1..=4 {
            let lost_at = Instant::now();
            until(|| connector.open_count() == session + 1).await;
            gaps.push(lost_at.elapsed());
            connector.emit(session, SessionEvent::Closed);
        }
        until(|| facade.current_state() == ConnectionState::Disconnected).await;

        // Assert: 0, 2, 10, 30 s (each within one polling step).
        let expected = [0, 2, 10, 30];
        for (gap, secs) in gaps.iter().zip(expected) {
            assert!(*gap >= Duration::from_secs(secs), "gap {gap:?} < {secs}s");
            assert!(*gap < Duration::from_secs(secs) + Duration::from_millis(200), "gap {gap:?}");
        }
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.open_count(), 5);
        assert_eq!(states.lock().unwrap().last(), Some(&ConnectionState::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_schedule() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;

        connector.emit(0, SessionEvent::Closed);
        until(|| connector.open_count() == 2).await;
        connector.emit(1, SessionEvent::Opened);
        until(|| facade.current_state() == ConnectionState::Connected).await;

        // The next loss starts from the 0 s step again.
        let lost_at = Instant::now();
        connector.emit(1, SessionEvent::Closed);
        until(|| connector.open_count() == 3).await;
        assert!(lost_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_connect() {
        let connector = MockHubConnector::new();
        let facade = private_facade(&connector);
        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;

        facade.disconnect().await;

        assert_eq!(pending.await.unwrap(), Err(ConnectError::Cancelled));
        assert_eq!(facade.current_state(), ConnectionState::Disconnected);
        assert!(connector.is_closed(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff_stops_retrying() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;
        connector.emit(0, SessionEvent::Closed);
        until(|| connector.open_count() == 2).await;
        connector.emit(1, SessionEvent::Closed);
        until(|| facade.current_state() == ConnectionState::Reconnecting).await;

        facade.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.open_count(), 2);
        assert_eq!(facade.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_reuses_session() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;

        assert_eq!(facade.connect().await, Ok(()));
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_reach_listeners_and_other_targets_do_not() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        facade.on_notification(move |data| sink.lock().unwrap().push(data.clone()));

        connector.emit(0, SessionEvent::Frame(ProtocolFrame::Invocation(InvocationFrame::new(
            "SomethingElse",
            vec![json!(1)],
        ))));
        connector.emit(0, SessionEvent::Frame(ProtocolFrame::Invocation(InvocationFrame::new(
            "ReceiveNotification",
            vec![json!({"title": "hi"})],
        ))));
        until(|| !seen.lock().unwrap().is_empty()).await;

        assert_eq!(*seen.lock().unwrap(), vec![json!({"title": "hi"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_echo_and_liveness_ping() {
        let connector = MockHubConnector::new();
        let _facade = connected(&connector).await;

        connector.emit(0, SessionEvent::Frame(ProtocolFrame::Ping));
        until(|| connector.sent_frames(0) == vec![ProtocolFrame::Ping]).await;

        // Two more from the 15 s liveness timer.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(connector.sent_frames(0).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnecting_session_is_not_pinged_before_handshake() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;

        connector.emit(0, SessionEvent::Closed);
        until(|| connector.open_count() == 2).await;
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(facade.current_state(), ConnectionState::Connecting);
        assert!(connector.sent_frames(0).is_empty());
        assert!(connector.sent_frames(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_announce_only_when_connected() {
        let connector = MockHubConnector::new();
        let facade = private_facade(&connector);
        assert_eq!(
            facade.announce(ClientActivity::Active).await,
            Err(AnnounceError::NotConnected)
        );

        let pending = spawn_connect(&facade);
        until(|| connector.open_count() == 1).await;
        connector.emit(0, SessionEvent::Opened);
        pending.await.unwrap().unwrap();
        facade.announce(ClientActivity::Active).await.unwrap();

        assert_eq!(
            connector.sent_frames(0),
            vec![ProtocolFrame::Invocation(InvocationFrame::new(
                "UpdateClientState",
                vec![json!("active")],
            ))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_facade_closes_session() {
        let connector = MockHubConnector::new();
        let facade = connected(&connector).await;

        drop(facade);

        until(|| connector.open_sessions() == 0).await;
    }
}
