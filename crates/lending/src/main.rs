use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use grove_lending::config;
use grove_lending::core::health_monitor::HealthMonitor;
use grove_lending::core::EngineContext;
use grove_lending::execution::price_feed::PriceCache;
use grove_lending::execution::settlement::DryRunSettlement;
use grove_lending::logging;
use grove_lending::store::Store;
use grove_lending::types::LendingEvent;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("LENDING_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        db = %config.app.database.path,
        interest_rate = %config.lending.interest_rate,
        liquidation_threshold = %config.lending.liquidation_threshold,
        auto_liquidate = config.timing.health_monitoring.auto_liquidate,
        "grove lending engine starting"
    );

    // -----------------------------------------------------------------------
    // Component construction
    // -----------------------------------------------------------------------

    if let Some(parent) = Path::new(&config.app.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
    }
    let store = Arc::new(
        Store::connect(&config.app.database.path)
            .await
            .context("failed to open lending store")?,
    );

    // This binary runs no oracle. The embedding system owns the adapter that
    // pushes quotes through `PriceCache::update`; until it does, every sweep
    // defers with `PriceUnavailable`. Settlement stays dry-run until a ledger
    // adapter is wired in.
    let prices = Arc::new(PriceCache::new());
    let settlement = Arc::new(DryRunSettlement::new());
    warn!("no price oracle attached: health sweeps defer until quotes are pushed");

    let (event_tx, mut event_rx) = mpsc::channel::<LendingEvent>(256);
    let ctx = EngineContext::new(store.clone(), prices, settlement, config).with_events(event_tx);

    let shutdown = CancellationToken::new();
    let health_monitor = HealthMonitor::new(ctx.clone(), shutdown.clone());

    info!("all components initialized");

    // -----------------------------------------------------------------------
    // Runtime tasks
    // -----------------------------------------------------------------------

    let health_handle = tokio::spawn(async move {
        health_monitor.run().await;
    });

    let events_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(loan_id = event.loan_id(), event = %json, "lending event"),
                Err(e) => warn!(error = %e, "failed to encode lending event"),
            }
        }
    });

    info!("engine running, press Ctrl+C to shutdown");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    if let Err(e) = health_handle.await {
        error!(error = %e, "health monitor task panicked");
    }

    // Dropping the last sender ends the event task.
    drop(ctx);
    if let Err(e) = events_handle.await {
        error!(error = %e, "event sink task panicked");
    }

    store.close().await;
    info!("shutdown complete");
    Ok(())
}
