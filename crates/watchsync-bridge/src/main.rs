//! WatchSync bridge entry point.
//!
//! Loads the configuration, wires the device and its modules through
//! [`BridgeRuntime`], then pumps the local event feed until it ends or
//! Ctrl+C is pressed.
//!
//! # Usage
//!
//! ```text
//! watchsync-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [default: platform config dir]
//!   --bus-address <ADDRESS>  Address of the watch's bus
//!   --bus-name <NAME>        Well-known name of the exported media player
//!   --log-level <FILTER>     Log filter when RUST_LOG is unset
//!   --dry-run                Use the in-memory loopback bus
//!   --events <PATH|->        JSON-lines local event feed [default: -]
//!   --assume-connected       Mark the watch connected at startup
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ BridgeRuntime::build()     -- device + modules, registration order
//!  └─ write_requests()           -- dismiss/refresh lines to stdout
//!  └─ pump_feed()                -- feed lines -> hub / device state
//!  └─ BridgeRuntime::shutdown()  -- unsync, drain, stop the worker
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watchsync_core::{ConnectionState, NotificationFilter};

use watchsync_bridge::application::remote_bus::BusConnector;
use watchsync_bridge::infrastructure::local_events::{pump_feed, write_requests};
use watchsync_bridge::infrastructure::remote_bus::memory::MemoryConnector;
use watchsync_bridge::infrastructure::ringer::InMemoryRinger;
use watchsync_bridge::infrastructure::storage::config::{load_config, load_config_from, BridgeConfig};
use watchsync_bridge::infrastructure::transport::LoggingTransport;
use watchsync_bridge::runtime::BridgeRuntime;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Companion bridge mirroring phone notifications and media onto a watch.
///
/// Values given here override the config file.
#[derive(Debug, Parser)]
#[command(
    name = "watchsync-bridge",
    about = "Mirrors phone notifications and media sessions onto a paired watch",
    version
)]
struct Cli {
    /// Config file.  Defaults to `config.toml` in the platform config dir.
    #[arg(long, env = "WATCHSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the watch's bus, e.g. `tcp:host=192.168.2.15,port=55556`.
    #[arg(long, env = "WATCHSYNC_BUS_ADDRESS")]
    bus_address: Option<String>,

    /// Well-known name the media player is exported under.
    #[arg(long, env = "WATCHSYNC_BUS_NAME")]
    bus_name: Option<String>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, env = "WATCHSYNC_LOG")]
    log_level: Option<String>,

    /// Talk to the in-memory loopback bus instead of a real one.
    #[arg(long)]
    dry_run: bool,

    /// JSON-lines local event feed; `-` reads stdin.
    #[arg(long, default_value = "-")]
    events: String,

    /// Mark the watch connected at startup instead of waiting for a
    /// `device` feed line.
    #[arg(long)]
    assume_connected: bool,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    fn resolve_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().unwrap_or_else(|e| {
                // No platform dir (stripped container): run on defaults.
                eprintln!("config unavailable ({e}); using defaults");
                BridgeConfig::default()
            }),
        };
        if let Some(address) = &self.bus_address {
            config.remote_bus.address = address.clone();
        }
        if let Some(name) = &self.bus_name {
            config.media.bus_name = name.clone();
        }
        if let Some(level) = &self.log_level {
            config.bridge.log_level = level.clone();
        }
        Ok(config)
    }

    fn connector(&self) -> anyhow::Result<Arc<dyn BusConnector>> {
        if self.dry_run {
            return Ok(Arc::new(MemoryConnector::new()));
        }
        #[cfg(feature = "dbus")]
        {
            Ok(Arc::new(
                watchsync_bridge::infrastructure::remote_bus::zbus_bus::ZbusConnector,
            ))
        }
        #[cfg(not(feature = "dbus"))]
        {
            anyhow::bail!("built without the `dbus` feature; pass --dry-run to use the loopback bus")
        }
    }

    async fn open_events(&self) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        if self.events == "-" {
            return Ok(Box::new(BufReader::new(tokio::io::stdin())));
        }
        let file = tokio::fs::File::open(&self.events)
            .await
            .with_context(|| format!("failed to open event feed {}", self.events))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.bridge.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        address = %config.remote_bus.address,
        bus_name = %config.media.bus_name,
        dry_run = cli.dry_run,
        "WatchSync bridge starting"
    );

    let runtime = BridgeRuntime::build(
        &config,
        cli.connector()?,
        Arc::new(LoggingTransport),
        Arc::new(InMemoryRinger::default()),
    )
    .context("failed to register connectivity modules")?;

    // ── Outbound listener requests ────────────────────────────────────────────
    let requests = tokio::spawn(write_requests(
        runtime.hub.subscribe_notifications(),
        tokio::io::stdout(),
    ));

    if cli.assume_connected {
        runtime.device.set_connection_state(ConnectionState::Connected);
    }

    // ── Local event feed ──────────────────────────────────────────────────────
    let events = cli.open_events().await?;
    let filter = NotificationFilter::new(config.notifications.allowed_ongoing.clone());
    let feed = pump_feed(
        events,
        Arc::clone(&runtime.device),
        Arc::clone(&runtime.hub),
        filter,
    );

    tokio::select! {
        result = feed => match result {
            Ok(stats) => info!(?stats, "event feed finished"),
            Err(e) => error!("event feed failed: {e}"),
        },
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => warn!("failed to listen for Ctrl+C: {e}"),
        },
    }

    runtime.shutdown().await;
    requests.abort();

    info!("WatchSync bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
