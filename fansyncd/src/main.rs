//! FanSync Server
//!
//! REST API server for a Bluetooth LE ceiling fan.
//!
//! The daemon keeps a cached view of the fan, refreshed by a background
//! poller, and turns REST calls into protocol exchanges. With `--mock` it
//! talks to an in-memory simulated fan instead of a real device.

mod api;
mod commands;
mod config;
mod direction;
mod polling;
mod shutdown;

use anyhow::{bail, Result};
use api::AppState;
use clap::Parser;
use commands::FanCommands;
use config::RuntimeConfig;
use direction::DirectionSequencer;
use fansync_core::{default_config_path, DeviceStatus};
use fansync_hardware::{BtleplugLocator, DeviceLocator, FanDevice, LinkManager, SimulatedFan};
use polling::PollingCoordinator;
use shutdown::ShutdownHooks;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// FanSync API Server
#[derive(Parser, Debug)]
#[command(name = "fansyncd")]
#[command(version, about = "FanSync Ceiling Fan API Server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server bind address (defaults to server.hostname from the config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bluetooth address of the fan (e.g. AA:BB:CC:DD:EE:FF)
    ///
    /// Takes precedence over device.address in the config file.
    #[arg(long)]
    address: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable mock mode (run against a simulated fan)
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    info!("FanSync Server starting...");

    // Determine config path: CLI flag > env var > default
    let config_path = args.config.unwrap_or_else(|| {
        std::env::var("FANSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path())
    });
    info!("Configuration file: {}", config_path.display());

    let mut runtime_config = RuntimeConfig::load(&config_path).await?;
    if let Some(address) = args.address {
        runtime_config.set_address(address);
    }
    info!(
        "Configuration loaded from {}",
        runtime_config.path().display()
    );
    let config = runtime_config.static_config().clone();

    let locator: Arc<dyn DeviceLocator> = if args.mock {
        info!("Mock mode: using a simulated fan");
        Arc::new(SimulatedFan::new(DeviceStatus::default()))
    } else if config.device.address.is_empty() {
        error!(
            "No fan address configured. Use one of:\n  \
             --address AA:BB:CC:DD:EE:FF          (command line)\n  \
             device.address in config.toml       (config file)\n  \
             --mock                              (simulated fan)"
        );
        bail!("no fan address configured");
    } else {
        info!(
            "Fan '{}' at {}",
            config.device.name, config.device.address
        );
        Arc::new(BtleplugLocator::new(
            &config.device.address,
            &config.device.name,
            config.link.scan_timeout(),
        )?)
    };

    let link = LinkManager::with_config(locator, &config.link);
    let device = Arc::new(FanDevice::new(link, config.device.name.clone()));
    let coordinator = Arc::new(PollingCoordinator::new(device, config.polling.clone()));

    let hooks = ShutdownHooks::new();
    let sequencer = DirectionSequencer::new(coordinator.clone(), config.direction.settle(), &hooks);
    let commands = Arc::new(FanCommands::new(coordinator.clone(), sequencer));

    let tracker = commands.spawn_tracker();

    // First refresh before serving; the poller keeps retrying on failure
    match coordinator.refresh().await {
        Ok(status) => info!("Initial status: {:?}", status),
        Err(e) => warn!("Initial status read failed, continuing: {}", e),
    }

    let (stop_polling, stop_rx) = watch::channel(false);
    let poll_task = tokio::spawn(coordinator.clone().run(stop_rx));

    let app = api::create_router(AppState::new(commands));

    let host = args.bind.unwrap_or(config.server.hostname);
    let port = args.port.unwrap_or(config.server.port);
    let bind_addr = format!("{}:{}", host, port);

    info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("FanSync API Server listening on {}", bind_addr);
    info!("Server ready!");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown::teardown(&hooks, &stop_polling, poll_task, &coordinator).await;
    tracker.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
