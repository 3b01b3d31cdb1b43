//! Linkwatch - periodic HTTP link monitoring.
//!
//! Registers canonical URLs, probes each of them every tick with bounded
//! concurrency and per-host serialization, and serves the registry and the
//! probe history over a small JSON API.

mod canon;
mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::Config;
use db::{SqliteStorage, Storage};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("linkwatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting linkwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start the probe scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone(), &cfg)?);
    scheduler.start();

    // Serve the API until a shutdown signal arrives
    let server = Server::new(cfg.clone(), store.clone());
    server.start(shutdown_signal()).await?;

    tracing::info!("Shutdown requested, draining in-flight probes");
    if tokio::time::timeout(cfg.shutdown_grace, scheduler.stop())
        .await
        .is_err()
    {
        tracing::warn!("Grace period expired before all probes finished");
    }
    store.close()?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
