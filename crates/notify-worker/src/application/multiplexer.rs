//! The shared connection state machine.
//!
//! # Overview
//!
//! A [`Multiplexer`] owns at most one hub [`Session`] and a set of
//! subscriber ports.  Everything that can change its state arrives as a
//! [`MuxEvent`] and is handled to completion by [`Multiplexer::handle`]
//! before the next event is looked at:
//!
//! ```text
//!  port commands ─┐
//!  session events ├──▶ mpsc ──▶ Multiplexer::handle ──▶ WorkerMessage per port
//!  timer expiries ┘
//! ```
//!
//! Because the subscriber map is only touched from `handle`, a fan-out can
//! never observe a half-applied registration and no lock is needed.
//!
//! # States
//!
//! ```text
//!                 init
//!  Disconnected ───────▶ Connecting ──Opened──▶ Connected
//!  Failed       ◀──┐         │  ▲                  │
//!                  │    Closed  │ timer           Closed
//!                  │         ▼  │                  │
//!                  └─(no subs)─ Reconnecting ◀─────┘
//! ```
//!
//! # Invariant
//!
//! A session is open if and only if at least one subscriber is registered.
//! Removing the last subscriber tears the session and both timers down in
//! the same `handle` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use notify_core::{
    ClientActivity, ConnectionState, InvocationFrame, PortMessage, ProtocolFrame, SubscriberId,
    WorkerMessage,
};

use crate::domain::{Connector, EventCallback, MultiplexerConfig, Session, SessionEvent};

/// Everything the multiplexer reacts to.
#[derive(Debug)]
pub enum MuxEvent {
    /// A new subscriber port.  `outbox` receives its `WorkerMessage`s.
    Register {
        id: SubscriberId,
        outbox: UnboundedSender<WorkerMessage>,
    },
    /// A message posted by a registered port.
    Port { id: SubscriberId, message: PortMessage },
    /// The port went away (dropped or explicitly detached).
    Unregister { id: SubscriberId },
    /// A session lifecycle event, tagged with the generation of the session
    /// that produced it so events from a replaced session are ignored.
    Session { generation: u64, event: SessionEvent },
    ReconnectDue { timer: u64 },
    PingDue { timer: u64 },
    /// Tear everything down and stop the task.
    Shutdown,
}

/// A spawned timer task.  Dropping it cancels the timer.
#[derive(Debug)]
struct Timer {
    id: u64,
    delay: Duration,
    task: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The shared hub connection and its subscribers.
pub struct Multiplexer {
    config: MultiplexerConfig,
    connector: Arc<dyn Connector>,
    /// Loop-back sender for session callbacks and timers.
    events: UnboundedSender<MuxEvent>,

    subscribers: HashMap<SubscriberId, UnboundedSender<WorkerMessage>>,
    state: ConnectionState,
    hub_url: Option<String>,
    session: Option<Box<dyn Session>>,
    session_generation: u64,
    attempt_count: u32,
    ever_connected: bool,

    reconnect_timer: Option<Timer>,
    ping_timer: Option<Timer>,
    next_timer_id: u64,
    stopped: bool,
}

impl Multiplexer {
    /// `events` must be the sending half of the channel whose receiver
    /// feeds [`handle`](Self::handle); sessions and timers report back on it.
    pub fn new(
        config: MultiplexerConfig,
        connector: Arc<dyn Connector>,
        events: UnboundedSender<MuxEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            events,
            subscribers: HashMap::new(),
            state: ConnectionState::Disconnected,
            hub_url: None,
            session: None,
            session_generation: 0,
            attempt_count: 0,
            ever_connected: false,
            reconnect_timer: None,
            ping_timer: None,
            next_timer_id: 0,
            stopped: false,
        }
    }

    /// Runs the multiplexer until [`MuxEvent::Shutdown`].
    pub async fn run(mut self, mut events: tokio::sync::mpsc::UnboundedReceiver<MuxEvent>) {
        info!("multiplexer started");
        while let Some(event) = events.recv().await {
            self.handle(event);
            if self.stopped {
                break;
            }
        }
        info!("multiplexer stopped");
    }

    /// Applies one event.
    pub fn handle(&mut self, event: MuxEvent) {
        if self.stopped {
            return;
        }
        match event {
            MuxEvent::Register { id, outbox } => self.register(id, outbox),
            MuxEvent::Port { id, message } => self.on_port_message(id, message),
            MuxEvent::Unregister { id } => self.unregister(id),
            MuxEvent::Session { generation, event } => self.on_session_event(generation, event),
            MuxEvent::ReconnectDue { timer } => self.on_reconnect_due(timer),
            MuxEvent::PingDue { timer } => self.on_ping_due(timer),
            MuxEvent::Shutdown => {
                self.subscribers.clear();
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
                self.stopped = true;
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// `true` while a session exists and has not been closed.
    pub fn has_live_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Delay of the armed reconnect timer, if any.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_timer.as_ref().map(|t| t.delay)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    // ── Subscribers ──────────────────────────────────────────────────────────

    fn register(&mut self, id: SubscriberId, outbox: UnboundedSender<WorkerMessage>) {
        debug!(subscriber = %id, "subscriber registered");
        let greeting = WorkerMessage::StateChange { state: self.state };
        if outbox.send(greeting).is_err() {
            debug!(subscriber = %id, "subscriber gone before registration completed");
            return;
        }
        self.subscribers.insert(id, outbox);
    }

    fn unregister(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_none() {
            return;
        }
        debug!(subscriber = %id, remaining = self.subscribers.len(), "subscriber unregistered");
        if self.subscribers.is_empty() {
            self.release_connection();
        }
    }

    /// Last subscriber left: drop the connection and settle on Disconnected.
    fn release_connection(&mut self) {
        info!("no subscribers left; releasing hub connection");
        self.teardown();
        self.set_state(ConnectionState::Disconnected);
    }

    fn on_port_message(&mut self, id: SubscriberId, message: PortMessage) {
        if !self.subscribers.contains_key(&id) {
            debug!(subscriber = %id, ?message, "message from unregistered port ignored");
            return;
        }
        match message {
            PortMessage::Init { hub_url } => self.init(hub_url),
            PortMessage::Disconnect => self.unregister(id),
            PortMessage::Announce { state } => self.announce(state),
        }
    }

    /// Sends `message` to a snapshot of the subscribers.  Ports whose
    /// receiving side is gone are removed; the rest still get the message.
    fn broadcast(&mut self, message: &WorkerMessage) {
        let snapshot: Vec<(SubscriberId, UnboundedSender<WorkerMessage>)> = self
            .subscribers
            .iter()
            .map(|(id, outbox)| (*id, outbox.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, outbox) in snapshot {
            if outbox.send(message.clone()).is_err() {
                dead.push(id);
            }
        }

        if dead.is_empty() {
            return;
        }
        for id in &dead {
            warn!(subscriber = %id, "subscriber channel closed; removing");
            self.subscribers.remove(id);
        }
        if self.subscribers.is_empty() {
            self.release_connection();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "connection state changed");
        self.state = state;
        self.broadcast(&WorkerMessage::StateChange { state });
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    fn init(&mut self, hub_url: String) {
        if self.has_live_session() {
            if self.hub_url.as_deref() != Some(hub_url.as_str()) {
                debug!(requested = %hub_url, "session already live for another hub URL; ignoring init");
            }
            return;
        }
        self.hub_url = Some(hub_url.clone());
        self.open_session(&hub_url);
    }

    fn open_session(&mut self, hub_url: &str) {
        // A waiting reconnect would open a second session.
        self.reconnect_timer = None;
        // The old session may be closed with its Closed event still queued.
        self.ping_timer = None;

        self.session_generation += 1;
        let generation = self.session_generation;
        let events = self.events.clone();
        let on_event: EventCallback = Box::new(move |event| {
            // The multiplexer may already be gone; nothing left to tell.
            let _ = events.send(MuxEvent::Session { generation, event });
        });

        debug!(hub = %hub_url, generation, attempt = self.attempt_count, "opening hub session");
        self.session = Some(self.connector.open(hub_url, on_event));
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
                self.ever_connected = true;
                self.arm_ping_timer();
                self.set_state(ConnectionState::Connected);
            }
            SessionEvent::Frame(frame) => self.on_frame(frame),
            SessionEvent::Error(e) => warn!("hub session error: {e}"),
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
                debug!(subscribers = self.subscribers.len(), "fanning out notification");
                self.broadcast(&WorkerMessage::Notification { data });
            }
            ProtocolFrame::Ping => {
                if let Some(session) = &self.session {
                    session.send(&ProtocolFrame::Ping);
                }
            }
            ProtocolFrame::Close(close) => {
                info!(error = ?close.error, "hub requested close");
                // The session reports Closed, which drives the reconnect branch.
                if let Some(session) = self.session.as_mut() {
                    session.close();
                }
            }
            other => debug!(kind = other.kind_name(), "ignoring frame"),
        }
    }

    fn on_session_closed(&mut self) {
        self.ping_timer = None;
        let failed_while_connecting = self.state == ConnectionState::Connecting;
        self.session = None;

        if self.subscribers.is_empty() {
            let state = if failed_while_connecting && !self.ever_connected {
                ConnectionState::Failed
            } else {
                ConnectionState::Disconnected
            };
            self.set_state(state);
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
                warn!(attempts = self.attempt_count, "reconnect attempts exhausted");
                let state = if self.ever_connected {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Failed
                };
                self.set_state(state);
            }
        }
    }

    fn on_reconnect_due(&mut self, timer: u64) {
        if self.reconnect_timer.as_ref().map(|t| t.id) != Some(timer) {
            debug!(timer, "cancelled reconnect timer fired; ignoring");
            return;
        }
        self.reconnect_timer = None;
        if self.subscribers.is_empty() {
            return;
        }
        if let Some(hub_url) = self.hub_url.clone() {
            self.open_session(&hub_url);
        }
    }

    fn on_ping_due(&mut self, timer: u64) {
        if self.ping_timer.as_ref().map(|t| t.id) != Some(timer) {
            return;
        }
        if let Some(session) = &self.session {
            session.send(&ProtocolFrame::Ping);
        }
    }

    fn announce(&mut self, state: ClientActivity) {
        match &self.session {
            Some(session) if self.state.is_connected() => {
                let frame = ProtocolFrame::Invocation(InvocationFrame::new(
                    self.config.client_state_target.clone(),
                    vec![Value::String(state.as_str().to_string())],
                ));
                session.send(&frame);
            }
            _ => debug!(%state, "not connected; client state announcement dropped"),
        }
    }

    /// Cancels both timers and closes the session.  The session's own
    /// `Closed` event arrives later and is ignored as stale.
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
            let _ = events.send(MuxEvent::ReconnectDue { timer: id });
        });
        // Replacing the previous timer aborts it.
        self.reconnect_timer = Some(Timer { id, delay, task });
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
                if events.send(MuxEvent::PingDue { timer: id }).is_err() {
                    break;
                }
            }
        });
        self.ping_timer = Some(Timer {
            id,
            delay: period,
            task,
        });
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
