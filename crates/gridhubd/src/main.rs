//! gridhubd — grid rendezvous daemon.

use anyhow::{Context, Result};

use gridhub_core::config::GridhubConfig;
use gridhub_services::{EstimationClient, GridState};
use gridhubd::{Acceptor, ConnectionContext, WorkerTracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GridhubConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GridhubConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GridhubConfig::default()
    });
    tracing::info!(path = %GridhubConfig::file_path().display(), "gridhubd starting");

    // Shared state
    let state = GridState::from_config(&config.grid).context("invalid grid configuration")?;
    tracing::info!(
        load_nodes = ?config.grid.load_nodes,
        assignable = ?config.grid.assignable_nodes,
        base_voltage = config.grid.base_voltage,
        "grid ready"
    );

    let estimator =
        EstimationClient::from_config(&config.engine).context("failed to start estimation engine")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Serve ────────────────────────────────────────────────────────────────
    let ctx = ConnectionContext {
        state,
        estimator: estimator.clone(),
        tracker: WorkerTracker::shared(),
        idle_timeout: config.network.idle_timeout(),
        release_on_disconnect: config.network.release_on_disconnect,
    };
    let acceptor = Acceptor::bind(&config.network, ctx, shutdown_tx.clone())?;
    let result = acceptor.run().await;

    estimator.shutdown().await;
    tracing::info!("gridhubd stopped");
    result
}
