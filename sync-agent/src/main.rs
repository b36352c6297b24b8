//! Sync Agent - Main entry point
//!
//! Mirrors a local directory to a remote object store on a fixed interval.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sync_agent::{api, config::Config, daemon::shutdown::ShutdownCoordinator, events::EventBus, store, utils, SyncEngine};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,

    /// Do not start the local control API
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    api::health::init_start_time();

    let profile = config.sync_profile();
    tracing::info!(
        "Starting sync-agent v{} (device_id: {})",
        env!("CARGO_PKG_VERSION"),
        profile.device_id
    );
    tracing::info!("Local directory: {}", profile.local_dir.display());

    let store = store::from_config(&config.remote)?;
    let engine = Arc::new(SyncEngine::new(store, config.device.data_dir.clone(), EventBus::new()));

    if args.once {
        let outcome = engine.run_once(&profile).await?;
        tracing::info!("Cycle finished: {:?}", outcome);
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new();

    // Start the control API unless disabled
    let server_handle = if config.api.enabled && !args.no_api {
        let app = api::create_router(api::AppState::new(engine.clone(), profile.clone()));
        let listener = tokio::net::TcpListener::bind(config.api.listen).await?;

        tracing::info!("Listening on http://{}", config.api.listen);
        tracing::info!("Status endpoint: http://{}/sync/status", config.api.listen);
        tracing::info!("WebSocket endpoint: ws://{}/ws", config.api.listen);

        let mut shutdown_rx = shutdown_coordinator.subscribe();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
        });
        Some(tokio::spawn(async move { server.await }))
    } else {
        None
    };

    engine.start(profile);

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    // Let an in-flight cycle finish and release its lease
    engine.stop().await;

    if let Some(server_handle) = server_handle {
        match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
            Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
            Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
            Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
        }
    }

    Ok(())
}
