//! Adaptive client state announcements.
//!
//! While the user is active the hub hears `"active"` every 30 s; while idle
//! it hears `"idle"` every 180 s.  Every activity transition cancels the
//! pending announcement and re-arms it at the new interval, so an idle tab
//! never waits out a leftover active-interval timer.
//!
//! Announcements are telemetry.  They are skipped while not connected and a
//! failed send is logged and forgotten.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use notify_core::{ClientActivity, ListenerId};

use crate::application::activity::ActivityDetector;
use crate::application::facade::AnnounceError;

/// Where announcements go.  Implemented by
/// [`ConnectionFacade`](crate::application::facade::ConnectionFacade).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateAnnouncer: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn announce(&self, activity: ClientActivity) -> Result<(), AnnounceError>;
}

/// Announcement period per activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveIntervals {
    pub active: Duration,
    pub idle: Duration,
}

impl KeepAliveIntervals {
    pub fn for_activity(&self, activity: ClientActivity) -> Duration {
        match activity {
            ClientActivity::Active => self.active,
            ClientActivity::Idle => self.idle,
        }
    }
}

impl Default for KeepAliveIntervals {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(30),
            idle: Duration::from_secs(180),
        }
    }
}

/// A running keep-alive.  Stops when dropped.
pub struct AdaptiveKeepAlive {
    detector: Arc<ActivityDetector>,
    listener: ListenerId,
    task: JoinHandle<()>,
}

impl AdaptiveKeepAlive {
    /// Starts announcing at the interval matching the detector's current
    /// state.
    pub fn start(
        detector: Arc<ActivityDetector>,
        announcer: Arc<dyn StateAnnouncer>,
        intervals: KeepAliveIntervals,
    ) -> Self {
        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let listener = detector.on_change(move |active| {
            let _ = transitions_tx.send(ClientActivity::from_active(*active));
        });
        let task = tokio::spawn(run_keep_alive(
            detector.activity(),
            announcer,
            intervals,
            transitions_rx,
        ));
        Self {
            detector,
            listener,
            task,
        }
    }

    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for AdaptiveKeepAlive {
    fn drop(&mut self) {
        self.detector.remove_listener(self.listener);
        self.task.abort();
    }
}

async fn run_keep_alive(
    mut activity: ClientActivity,
    announcer: Arc<dyn StateAnnouncer>,
    intervals: KeepAliveIntervals,
    mut transitions: mpsc::UnboundedReceiver<ClientActivity>,
) {
    let mut deadline = Instant::now() + intervals.for_activity(activity);
    loop {
        tokio::select! {
            transition = transitions.recv() => {
                let Some(next) = transition else { break };
                activity = next;
                deadline = Instant::now() + intervals.for_activity(activity);
                debug!(%activity, next_in_secs = intervals.for_activity(activity).as_secs(), "keep-alive re-armed");
            }
            _ = sleep_until(deadline) => {
                if announcer.is_connected() {
                    if let Err(e) = announcer.announce(activity).await {
                        warn!(%activity, "client state announcement failed: {e}");
                    }
                } else {
                    debug!(%activity, "not connected; skipping client state announcement");
                }
                deadline = Instant::now() + intervals.for_activity(activity);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
