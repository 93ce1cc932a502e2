use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

mod config;
mod engine;
mod exporter;
mod models;
mod report;
mod snapshot;

use crate::config::ExporterConfig;
use crate::engine::Engine;
use crate::exporter::SnapshotCollector;
use crate::snapshot::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ExporterConfig::from_env()?;

    let default_level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_ansi(true)
        .init();

    let store = Arc::new(SnapshotStore::new());
    let registry = prometheus::Registry::new();
    registry.register(Box::new(SnapshotCollector::new(Arc::clone(&store))))?;
    let engine = Engine::new(config.clone(), Arc::clone(&store), &registry)?;

    let listen_port = config.listen_port;
    let http_registry = registry.clone();
    tokio::spawn(async move {
        exporter::serve(listen_port, http_registry).await;
    });

    tokio::spawn(async move {
        if let Err(e) = engine.run().await {
            tracing::error!("scan engine failed: {}", e);
        }
    });

    info!(
        "started, scanning {} every {}s",
        config.target_range, config.interval_secs
    );
    signal::ctrl_c().await?;
    info!("Shutdown signal received. Closing exporter...");

    Ok(())
}
