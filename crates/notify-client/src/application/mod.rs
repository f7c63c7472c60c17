//! Application layer for notify-client.
//!
//! - [`facade`]: the per-tab [`ConnectionFacade`] and the
//!   [`ConnectionStrategy`] seam its two backings plug into.
//! - [`activity`]: the [`ActivityDetector`] and its periodic idle check.
//! - [`keep_alive`]: [`AdaptiveKeepAlive`], which announces the detector's
//!   state through any [`StateAnnouncer`].
//!
//! Nothing here opens sockets; the strategies that do live in
//! `infrastructure`.

pub mod activity;
pub mod facade;
pub mod keep_alive;

pub use activity::{spawn_idle_check, ActivityDetector};
pub use facade::{
    AnnounceError, ConnectError, ConnectionFacade, ConnectionMode, ConnectionStrategy, FacadeEvent,
    Observers,
};
pub use keep_alive::{AdaptiveKeepAlive, KeepAliveIntervals, StateAnnouncer};
