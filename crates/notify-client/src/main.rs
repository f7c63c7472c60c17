//! notify-tail: follow a notification hub from the terminal.
//!
//! Opens one or more simulated tabs against a hub and logs every
//! notification and connection state change until Ctrl+C.  By default all
//! tabs share one connection through the multiplexer; `--no-shared` gives
//! each tab its own.
//!
//! Every line typed on stdin counts as a key press in every tab, which is
//! enough to watch the activity detector and the keep-alive switch between
//! the active and idle announcement intervals.
//!
//! # Usage
//!
//! ```text
//! notify-tail [OPTIONS]
//!
//! Options:
//!   --hub-url <URL>          Hub endpoint (http or https)
//!   --config <PATH>          TOML config file [default: notify-client.toml]
//!   --tabs <N>               Number of simulated tabs
//!   --no-shared              One private connection per tab
//!   --idle-threshold <SECS>  Seconds without input before a tab is idle
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Description                  |
//! |-------------------------|------------------------------|
//! | `NOTIFY_HUB_URL`        | Hub endpoint                 |
//! | `NOTIFY_CONFIG`         | Config file path             |
//! | `NOTIFY_TABS`           | Number of simulated tabs     |
//! | `NOTIFY_IDLE_THRESHOLD` | Idle threshold (secs)        |
//!
//! Command-line values win over the environment, which wins over the file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use notify_client::application::{
    spawn_idle_check, ActivityDetector, AdaptiveKeepAlive, ConnectionFacade, KeepAliveIntervals,
    StateAnnouncer,
};
use notify_client::domain::{ClientConfig, InputKind};
use notify_client::infrastructure::HubAccess;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Follow a notification hub from the terminal.
#[derive(Debug, Parser)]
#[command(
    name = "notify-tail",
    about = "Log hub notifications for one or more simulated tabs",
    version
)]
struct Cli {
    /// Hub endpoint, e.g. `https://example.org/hubs/notifications`.
    #[arg(long, env = "NOTIFY_HUB_URL")]
    hub_url: Option<String>,

    /// TOML configuration file.  A missing file means built-in defaults.
    #[arg(long, default_value = "notify-client.toml", env = "NOTIFY_CONFIG")]
    config: PathBuf,

    /// Number of simulated tabs.
    #[arg(long, env = "NOTIFY_TABS")]
    tabs: Option<usize>,

    /// Give every tab its own hub connection instead of sharing one.
    #[arg(long)]
    no_shared: bool,

    /// Seconds without input before a tab counts as idle.
    #[arg(long, env = "NOTIFY_IDLE_THRESHOLD")]
    idle_threshold: Option<u64>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if an
    /// override makes the config invalid, or if no hub URL was given
    /// anywhere.
    fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::load(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(hub_url) = self.hub_url {
            config.hub_url = hub_url;
        }
        if let Some(tabs) = self.tabs {
            config.tabs = tabs;
        }
        if self.no_shared {
            config.shared = false;
        }
        if let Some(secs) = self.idle_threshold {
            config.activity.idle_threshold_secs = secs;
        }

        config.validate().context("invalid command-line override")?;
        if config.hub_url.is_empty() {
            anyhow::bail!("no hub URL: pass --hub-url or set hub_url in the config file");
        }
        Ok(config)
    }
}

// ── Tabs ──────────────────────────────────────────────────────────────────────

/// One simulated tab: a facade plus the activity machinery around it.
struct Tab {
    index: usize,
    facade: Arc<ConnectionFacade>,
    detector: Arc<ActivityDetector>,
    idle_check: JoinHandle<()>,
    keep_alive: AdaptiveKeepAlive,
}

impl Tab {
    fn open(index: usize, access: &HubAccess, config: &ClientConfig) -> anyhow::Result<Self> {
        let facade = Arc::new(
            access
                .facade(&config.hub_url)
                .context("shared connection is no longer running")?,
        );

        facade.on_notification(move |data| info!(tab = index, %data, "notification"));
        facade.on_state_change(move |state| info!(tab = index, %state, "connection state"));

        let detector = Arc::new(ActivityDetector::new(config.idle_threshold(), Instant::now()));
        detector.on_change(move |active| {
            info!(tab = index, active = *active, "activity changed");
        });
        let idle_check = spawn_idle_check(Arc::clone(&detector), config.idle_check_interval());

        let announcer: Arc<dyn StateAnnouncer> = facade.clone();
        let keep_alive = AdaptiveKeepAlive::start(
            Arc::clone(&detector),
            announcer,
            KeepAliveIntervals {
                active: config.active_announce_interval(),
                idle: config.idle_announce_interval(),
            },
        );

        Ok(Self {
            index,
            facade,
            detector,
            idle_check,
            keep_alive,
        })
    }

    async fn close(self) {
        self.keep_alive.stop();
        self.idle_check.abort();
        self.facade.disconnect().await;
        info!(tab = self.index, "tab closed");
    }
}

/// Feeds stdin lines to every tab as key presses until stdin ends.
async fn forward_input(detectors: Vec<Arc<ActivityDetector>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(_)) => {
                let now = Instant::now();
                for detector in &detectors {
                    detector.record_input(InputKind::KeyDown, now);
                }
            }
            Ok(None) => {
                info!("stdin closed; activity input stopped");
                break;
            }
            Err(e) => {
                warn!("failed to read stdin: {e}");
                break;
            }
        }
    }
    // Keep running without input; Ctrl+C still ends the program.
    std::future::pending::<()>().await;
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_client_config()?;
    let access = HubAccess::from_config(&config);
    info!(
        hub = %config.hub_url,
        tabs = config.tabs,
        mode = ?access.mode(),
        "notify-tail starting"
    );

    let mut tabs = Vec::with_capacity(config.tabs);
    for index in 0..config.tabs {
        tabs.push(Tab::open(index, &access, &config)?);
    }
    for tab in &tabs {
        // Private connections report failure here; shared ones only through
        // the state listener.
        if let Err(e) = tab.facade.connect().await {
            warn!(tab = tab.index, "connect failed: {e}");
        }
    }

    let detectors = tabs.iter().map(|tab| Arc::clone(&tab.detector)).collect();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        },
        _ = forward_input(detectors) => {}
    }

    for tab in tabs {
        tab.close().await;
    }
    access.shutdown();

    info!("notify-tail stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
