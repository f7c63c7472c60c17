//! Mock hub connector for unit and integration testing.
//!
//! # Why a mock connector?
//!
//! The real [`HubConnector`](super::hub_transport::HubConnector) needs a
//! running hub that answers the negotiate request and speaks the handshake.
//! State machine tests only care about *which* sessions were opened, *what*
//! was sent on them, and how the owner reacts to lifecycle events.
//!
//! `MockHubConnector` records every `open` call.  Each recorded session
//! keeps its event callback, so a test can play the hub's part:
//!
//! ```ignore
//! let connector = MockHubConnector::new();
//! let handle = spawn_multiplexer(MultiplexerConfig::default(), Arc::new(connector.clone()));
//!
//! // ... a subscriber posts Init ...
//! connector.emit(0, SessionEvent::Opened);
//! assert_eq!(connector.sent_frames(0), vec![]);
//! ```
//!
//! Like the real session, closing a `MockHubSession` reports
//! [`SessionEvent::Closed`] through its callback exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use notify_core::ProtocolFrame;

use crate::domain::{Connector, EventCallback, Session, SessionEvent};

/// Everything recorded about one `open` call.
struct OpenedSession {
    hub_url: String,
    on_event: Arc<EventCallback>,
    sent: Arc<Mutex<Vec<ProtocolFrame>>>,
    closed: Arc<AtomicBool>,
}

/// A connector that records sessions instead of dialing a hub.
///
/// Cloning shares the recording, so a test can keep one clone while the
/// code under test owns another.
#[derive(Clone, Default)]
pub struct MockHubConnector {
    opened: Arc<Mutex<Vec<OpenedSession>>>,
}

impl MockHubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    /// Hub URL passed to the `index`-th `open` call.
    pub fn hub_url(&self, index: usize) -> Option<String> {
        self.lock().get(index).map(|s| s.hub_url.clone())
    }

    /// Frames sent on the `index`-th session, in order.
    pub fn sent_frames(&self, index: usize) -> Vec<ProtocolFrame> {
        self.lock()
            .get(index)
            .map(|s| lock_frames(&s.sent).clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.lock()
            .get(index)
            .map(|s| s.closed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Number of sessions that have not been closed.
    pub fn open_sessions(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Plays the hub: reports `event` on the `index`-th session.
    ///
    /// `Closed` also marks the session closed, mirroring a hub-side drop.
    /// Returns `false` if no such session was opened.
    pub fn emit(&self, index: usize, event: SessionEvent) -> bool {
        let target = self.lock().get(index).map(|s| {
            (Arc::clone(&s.on_event), Arc::clone(&s.closed))
        });
        let Some((on_event, closed)) = target else {
            return false;
        };
        if event == SessionEvent::Closed {
            closed.store(true, Ordering::SeqCst);
        }
        // Called outside the lock: the callback may re-enter the connector.
        on_event(event);
        true
    }

    /// [`emit`](Self::emit) on the most recently opened session.
    pub fn emit_latest(&self, event: SessionEvent) -> bool {
        match self.open_count() {
            0 => false,
            n => self.emit(n - 1, event),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OpenedSession>> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MockHubConnector {
    fn open(&self, hub_url: &str, on_event: EventCallback) -> Box<dyn Session> {
        let on_event = Arc::new(on_event);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.lock().push(OpenedSession {
            hub_url: hub_url.to_string(),
            on_event: Arc::clone(&on_event),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        Box::new(MockHubSession {
            on_event,
            sent,
            closed,
        })
    }
}

/// The session half handed to the code under test.
pub struct MockHubSession {
    on_event: Arc<EventCallback>,
    sent: Arc<Mutex<Vec<ProtocolFrame>>>,
    closed: Arc<AtomicBool>,
}

impl Session for MockHubSession {
    /// Records the frame unless the session is closed.
    fn send(&self, frame: &ProtocolFrame) {
        if !self.closed.load(Ordering::SeqCst) {
            lock_frames(&self.sent).push(frame.clone());
        }
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.on_event)(SessionEvent::Closed);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn lock_frames(frames: &Mutex<Vec<ProtocolFrame>>) -> MutexGuard<'_, Vec<ProtocolFrame>> {
    frames.lock().unwrap_or_else(|e| e.into_inner())
}
