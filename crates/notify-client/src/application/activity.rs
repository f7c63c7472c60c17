//! User activity detection.
//!
//! # How it works
//!
//! The detector keeps one timestamp: the last time any input was seen.
//!
//! - **Input** ([`ActivityDetector::record_input`]) refreshes the timestamp.
//!   If the detector was idle it flips to active and tells its observers
//!   straight away.
//! - **Idle check** ([`ActivityDetector::check_idle`]) runs on a fixed
//!   period and compares "now minus last input" with the idle threshold.
//!   It only ever flips active → idle.
//!
//! The idle check is level-triggered: it does not arm a timer per input, so
//! a delayed or skipped check still reaches the right answer on the next
//! one.
//!
//! Both methods take `now` explicitly, which keeps the state machine free
//! of clocks; [`spawn_idle_check`] supplies `Instant::now()` in production.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use notify_core::{ClientActivity, ListenerId, ListenerRegistry};

use crate::domain::InputKind;

/// Default idle threshold.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(120);

/// Default period of the idle check.
pub const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct DetectorState {
    last_activity: Instant,
    active: bool,
}

/// Tracks whether the user is active.  Observers receive `true` on
/// idle → active and `false` on active → idle.
pub struct ActivityDetector {
    idle_threshold: Duration,
    state: Mutex<DetectorState>,
    observers: ListenerRegistry<bool>,
}

impl ActivityDetector {
    /// A detector that counts `now` as the last activity and starts active.
    pub fn new(idle_threshold: Duration, now: Instant) -> Self {
        Self {
            idle_threshold,
            state: Mutex::new(DetectorState {
                last_activity: now,
                active: true,
            }),
            observers: ListenerRegistry::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn activity(&self) -> ClientActivity {
        ClientActivity::from_active(self.is_active())
    }

    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    pub fn on_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.observers.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Records one input event.
    pub fn record_input(&self, kind: InputKind, now: Instant) {
        let became_active = {
            let mut state = self.lock();
            state.last_activity = now;
            !std::mem::replace(&mut state.active, true)
        };
        if became_active {
            debug!(%kind, "user active again");
            self.observers.notify(&true);
        }
    }

    /// Flips to idle if the threshold has passed since the last input.
    /// Returns `true` if this call flipped the state.
    pub fn check_idle(&self, now: Instant) -> bool {
        let became_idle = {
            let mut state = self.lock();
            let elapsed = now.saturating_duration_since(state.last_activity);
            if state.active && elapsed >= self.idle_threshold {
                state.active = false;
                true
            } else {
                false
            }
        };
        if became_idle {
            debug!(threshold_secs = self.idle_threshold.as_secs(), "user idle");
            self.observers.notify(&false);
        }
        became_idle
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ActivityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDetector")
            .field("idle_threshold", &self.idle_threshold)
            .field("state", &*self.lock())
            .finish()
    }
}

/// Runs [`ActivityDetector::check_idle`] every `period` until the returned
/// handle is aborted.
pub fn spawn_idle_check(detector: Arc<ActivityDetector>, period: Duration) -> JoinHandle<()> {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            ticks.tick().await;
            detector.check_idle(Instant::now());
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
