//! archive-history - Historical record archive service
//!
//! Serves inspection and construction history for station folders under
//! the stations root, plus media streaming and record create/delete.

use anyhow::{Context, Result};
use archive_common::config::{find_config_file, load_toml_config, StationsRootResolver};
use archive_common::events::EventBus;
use archive_history::backend::LocalBackend;
use archive_history::history::{HistorySettings, HistoryService};
use archive_history::{build_router, AppState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(version, about = "Historical record archive service")]
struct Args {
    /// Directory holding one folder per station
    #[arg(long)]
    stations_root: Option<PathBuf>,

    /// Explicit TOML config file
    #[arg(short, long, env = "ARCHIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    // Build identification first, before any filesystem work
    info!(
        "Starting station archive history (archive-history) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match args.config.clone().or_else(find_config_file) {
        Some(path) => info!("Config file: {}", path.display()),
        None => warn!("No config file found, using built-in defaults"),
    }

    let (stations_root, source) =
        StationsRootResolver::new(args.stations_root.as_deref(), &config).resolve();
    info!("Stations root: {} ({:?})", stations_root.display(), source);
    std::fs::create_dir_all(&stations_root).with_context(|| {
        format!("Failed to create stations root {}", stations_root.display())
    })?;

    let backend = Arc::new(LocalBackend::new(config.streaming.chunk_size));
    let event_bus = EventBus::new(100);
    let history = Arc::new(HistoryService::new(
        backend,
        stations_root,
        HistorySettings::from(&config),
        event_bus.clone(),
    ));

    let shutdown = CancellationToken::new();
    let reaper = history.transport().spawn_reaper(
        config.streaming.idle_timeout(),
        config.streaming.reap_interval(),
        shutdown.clone(),
    );

    let state = AppState::new(history, event_bus, config.streaming.max_upload_bytes);
    let app = build_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("archive-history listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = reaper.await;
    info!("archive-history stopped");
    Ok(())
}
