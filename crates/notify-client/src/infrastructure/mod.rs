//! Infrastructure layer for notify-client.
//!
//! - [`shared`]: [`SharedConnection`], a subscriber port on the multiplexer.
//! - [`private`]: [`PrivateConnection`], one hub session per facade.
//!
//! [`HubAccess`] decides which one backs a new facade.  The decision is
//! made once per process: either a multiplexer could be started and every
//! facade shares it, or every facade gets its own session.

pub mod private;
pub mod shared;

use std::sync::Arc;

use notify_worker::{Connector, HubConnector, MultiplexerConfig, MultiplexerHandle, PortClosed};

use crate::application::facade::{ConnectionFacade, ConnectionMode, Observers};
use crate::domain::ClientConfig;

pub use private::PrivateConnection;
pub use shared::SharedConnection;

/// How facades reach the hub.
#[derive(Clone)]
pub enum HubAccess {
    /// Every facade gets a port on this multiplexer.
    Shared(MultiplexerHandle),
    /// Every facade opens its own session.
    Private {
        connector: Arc<dyn Connector>,
        config: MultiplexerConfig,
    },
}

impl HubAccess {
    /// Shared access when `multiplexer` is available, private otherwise.
    pub fn new(multiplexer: Option<MultiplexerHandle>, private: HubAccess) -> Self {
        match multiplexer {
            Some(handle) if handle.is_running() => HubAccess::Shared(handle),
            _ => private,
        }
    }

    /// Private access over a real hub connection.
    pub fn private(config: MultiplexerConfig) -> Self {
        let connector = HubConnector::new(config.handshake_timeout);
        HubAccess::Private {
            connector: Arc::new(connector),
            config,
        }
    }

    /// Starts whatever `config` asks for.
    pub fn from_config(config: &ClientConfig) -> Self {
        let multiplexer = config
            .shared
            .then(|| MultiplexerHandle::spawn(config.multiplexer_config()));
        Self::new(multiplexer, Self::private(config.private_config()))
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            HubAccess::Shared(_) => ConnectionMode::Shared,
            HubAccess::Private { .. } => ConnectionMode::Private,
        }
    }

    /// A new facade for `hub_url`.
    ///
    /// # Errors
    ///
    /// [`PortClosed`] if the shared multiplexer has already stopped.
    pub fn facade(&self, hub_url: &str) -> Result<ConnectionFacade, PortClosed> {
        let observers = Arc::new(Observers::new());
        let facade = match self {
            HubAccess::Shared(multiplexer) => {
                let strategy = SharedConnection::open(multiplexer, hub_url, Arc::clone(&observers))?;
                ConnectionFacade::new(Box::new(strategy), observers)
            }
            HubAccess::Private { connector, config } => {
                let strategy = PrivateConnection::spawn(
                    hub_url,
                    config.clone(),
                    Arc::clone(connector),
                    Arc::clone(&observers),
                );
                ConnectionFacade::new(Box::new(strategy), observers)
            }
        };
        Ok(facade)
    }

    /// Stops the shared multiplexer, if any.
    pub fn shutdown(&self) {
        if let HubAccess::Shared(multiplexer) = self {
            multiplexer.shutdown();
        }
    }
}

impl std::fmt::Debug for HubAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubAccess::Shared(multiplexer) => f.debug_tuple("Shared").field(multiplexer).finish(),
            HubAccess::Private { config, .. } => {
                f.debug_struct("Private").field("config", config).finish_non_exhaustive()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
