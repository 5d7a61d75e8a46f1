//! Tessera credential anchoring service.
//!
//! Main entry point. Loads configuration, connects the snapshot store,
//! starts the engine, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tessera::{Config, Engine};
use tessera_anchor::{HttpRelayer, LedgerRelayer};
use tessera_core::{
    store::postgres::PostgresSnapshotStore, MemorySnapshotStore, NoOpEventHandler, RealClock,
    SnapshotStore,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting Tessera anchoring engine");

    let config = Config::load()?;
    info!(
        database_url = config.database_url_masked().as_deref().unwrap_or("memory"),
        relayer = %config.relayer_endpoint,
        workers = config.worker_pool_size,
        "Configuration loaded"
    );

    let (store, pool) = match &config.database_url {
        Some(url) => {
            let pool = create_database_pool(&config, url).await?;
            let store = PostgresSnapshotStore::new(pool.clone());
            store.ensure_schema().await.context("Failed to create snapshot table")?;
            info!("Snapshot store connected");
            (Arc::new(store) as Arc<dyn SnapshotStore>, Some(pool))
        },
        None => {
            warn!("No database_url configured, engine state will not survive restarts");
            (Arc::new(MemorySnapshotStore::new()) as Arc<dyn SnapshotStore>, None)
        },
    };

    let relayer: Arc<dyn LedgerRelayer> = Arc::new(
        HttpRelayer::new(config.to_relayer_config()).context("Failed to build relayer client")?,
    );

    let mut engine =
        Engine::new(store, relayer, config, Arc::new(RealClock::new()), Arc::new(NoOpEventHandler));
    engine.start().await.context("Failed to start engine")?;
    info!("Tessera is ready");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "Engine did not stop cleanly");
    }

    if let Some(pool) = pool {
        pool.close().await;
        info!("Database connections closed");
    }

    info!("Tessera shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tessera=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config, url: &str) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
