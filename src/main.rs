// Edge Metrics Bridge - host and container metrics for a remote dashboard
//
// Polls resource state on a single edge device and exposes it over HTTP and
// a WebSocket push channel.
//
// # Features
// - CPU, memory, disk and network metrics
// - Docker container list, stats and logs (when Docker is present)
// - Short-lived response cache to keep polling load low
// - Periodic push to every connected WebSocket subscriber
// - Bearer token auth, CORS allow-list and per-client rate limiting
//
// # Usage
// edge-metrics-bridge [--config <file>] [--port <port>] [--token <token>]
//
// Example:
// edge-metrics-bridge --config /etc/edge-metrics-bridge.json --port 3001

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Module declarations
mod api;
mod broadcast;
mod cache;
mod config;
mod metrics;
mod registry;
mod state;

use config::BridgeConfig;
use metrics::{DockerAdapter, SysinfoHost};
use state::{AppState, SharedState};

/// Application entry point
///
/// This function:
/// 1. Initializes logging
/// 2. Loads configuration (file, environment, command line)
/// 3. Probes Docker and builds the metric sources
/// 4. Starts the broadcast loop and cache sweeper
/// 5. Serves HTTP until Ctrl+C / SIGTERM, then shuts everything down
#[tokio::main]
async fn main() -> Result<()> {
    // Logs are written to stdout/stderr and can be captured by systemd
    init_logging();

    info!("=== Edge Metrics Bridge Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    config.log_summary();

    let timeout = config.adapter_timeout();
    let docker = DockerAdapter::probe(timeout).await;
    let host = SysinfoHost::new(timeout);

    let state: SharedState = Arc::new(AppState::new(config, Arc::new(host), Arc::new(docker)));

    let cancel = CancellationToken::new();
    let broadcaster = state.broadcaster().spawn(cancel.clone());
    let sweeper = state
        .cache
        .spawn_sweeper(state.config.cache_sweep_interval(), cancel.clone());

    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("=== Edge Metrics Bridge Started Successfully ===");
    info!("Listening on http://{}", addr);
    info!("Press Ctrl+C to stop");

    let app = api::router(Arc::clone(&state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&state), cancel.clone()))
    .await
    .context("HTTP server failed")?;

    // Covers the server exiting without a signal
    cancel.cancel();

    for (name, handle) in [("Broadcast loop", broadcaster), ("Cache sweeper", sweeper)] {
        if let Err(e) = handle.await {
            error!("{} task panicked: {}", name, e);
        }
    }

    info!("=== Edge Metrics Bridge Stopped ===");
    Ok(())
}

/// Builds the configuration
///
/// Sources, later wins: defaults, `--config <file>`, `BRIDGE_*` environment
/// variables, command-line flags.
fn load_config() -> Result<BridgeConfig> {
    let args: Vec<String> = env::args().collect();

    let mut config = match config::find_arg(&args, "--config") {
        Some(path) => BridgeConfig::from_file(&PathBuf::from(path))?,
        None => BridgeConfig::default(),
    };

    config.apply_env()?;
    config.apply_args(&args)?;
    config.validate()?;

    Ok(config)
}

/// Resolves on Ctrl+C or SIGTERM, after stopping background work
///
/// Subscribers are closed here rather than after the server returns, since
/// open WebSocket connections would otherwise hold graceful shutdown open.
async fn shutdown_signal(state: SharedState, cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    cancel.cancel();
    let closed = state.registry.close_all();
    info!("Closed {} subscriber connection(s)", closed);
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp for each log entry
/// - Log level (INFO, WARN, ERROR, etc.)
/// - Target module name
/// - Colored output when running in terminal
/// - JSON output when running as systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug edge-metrics-bridge ...  # Enable debug logging
/// RUST_LOG=warn edge-metrics-bridge ...   # Only warnings and errors
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID environment variable
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        // Structured JSON is easier to parse from the journal
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
