//! Columbus hub: entry point.
//!
//! Serves the capability modules of the robot (vehicle, camera) to browser
//! clients over WebSocket.
//!
//! # Usage
//!
//! ```text
//! columbus-hub [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML config file [default: ~/.config/columbus/config.toml]
//!   --host <IP>                   Bind address [default: 0.0.0.0]
//!   --port <PORT>                 Bind port [default: 8080]
//!   --heartbeat-interval <SECS>   Heartbeat period and ack timeout [default: 10]
//!   --restrict-events             Only route events advertised by loaded modules
//!   --require-subprotocol         Reject clients that do not offer "columbus"
//! ```
//!
//! Settings are layered: built-in defaults, then the config file, then the
//! command line (or the matching `COLUMBUS_*` environment variable).
//!
//! The log filter comes from `RUST_LOG`, else the file's `log_level`, else
//! `info`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use columbus_hub::application::Hub;
use columbus_hub::domain::HubConfig;
use columbus_hub::infrastructure::hardware::{DevicePathProbe, SimulatedMotorDriver};
use columbus_hub::infrastructure::storage::{load_config, FileConfig};
use columbus_hub::infrastructure::{bind, serve};
use columbus_hub::modules;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Real-time WebSocket hub for the robot's hardware capabilities.
#[derive(Debug, Parser)]
#[command(name = "columbus-hub", version)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "COLUMBUS_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "COLUMBUS_HOST")]
    host: Option<String>,

    /// TCP port of the WebSocket server.
    #[arg(long, env = "COLUMBUS_PORT")]
    port: Option<u16>,

    /// Heartbeat period in seconds.
    ///
    /// Also the grace period before the first heartbeat and the time a client
    /// has to acknowledge one.
    #[arg(long, env = "COLUMBUS_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    /// Drop client events that no loaded module has advertised.
    #[arg(long, env = "COLUMBUS_RESTRICT_EVENTS")]
    restrict_events: bool,

    /// Reject clients that do not offer the "columbus" subprotocol.
    #[arg(long, env = "COLUMBUS_REQUIRE_SUBPROTOCOL")]
    require_subprotocol: bool,
}

impl Cli {
    /// Overlays the command-line settings onto `file`.
    fn apply(&self, file: &mut FileConfig) {
        if let Some(host) = &self.host {
            file.server.host = host.clone();
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if let Some(secs) = self.heartbeat_interval {
            file.heartbeat.interval_secs = secs;
        }
        file.server.restrict_events |= self.restrict_events;
        file.server.require_subprotocol |= self.require_subprotocol;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The file may name the log level, so it is read before logging starts.
    let file = load_config(cli.config.as_deref());
    let level = file
        .as_ref()
        .ok()
        .and_then(|f| f.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        .init();

    let mut file = file.context("failed to load configuration")?;
    cli.apply(&mut file);
    let config = file.to_hub_config().context("invalid configuration")?;

    info!(
        "columbus hub starting: addr={}, heartbeat={:?}, lifecycle={:?}",
        config.bind_addr, config.heartbeat_interval, config.lifecycle_interval
    );

    // One scheduler thread; hardware calls go to the bounded blocking pool.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.blocking_threads)
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: HubConfig) -> anyhow::Result<()> {
    let motor = Arc::new(SimulatedMotorDriver::new());
    let camera = Arc::new(DevicePathProbe::new(config.camera.device.clone()));
    let modules = modules::bundled(&config, motor, camera);

    let listener = bind(config.bind_addr).await?;
    let hub = Hub::new(config, modules).context("failed to register modules")?;
    serve(hub, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
