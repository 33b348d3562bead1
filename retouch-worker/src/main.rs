//! # Retouch Worker
//!
//! Standalone maintenance process for deployments where the API servers
//! run without their embedded sweeper. Enhancement jobs are executed by the
//! API process that dispatched them; this binary runs the stuck photo,
//! orphaned reservation and expiry sweeps against the shared database and
//! asset directory.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... RETOUCH_STORAGE_DIR=/var/lib/retouch cargo run -p retouch-worker
//! ```

use retouch_shared::config::CoreConfig;
use retouch_shared::context::CoreServices;
use retouch_shared::db::migrations::run_migrations;
use retouch_shared::db::pool::{create_pool, DatabaseConfig};
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::payments::HmacSignatureVerifier;
use retouch_shared::storage::FsAssetStorage;
use retouch_shared::store::PgStore;
use retouch_worker::config::WorkerConfig;
use retouch_worker::sweeper::Sweeper;
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "retouch_worker=debug,retouch_shared=info".into());
    if env::var("RETOUCH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Retouch Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let core = CoreConfig::from_env()?;
    let worker = WorkerConfig::from_env()?;

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set for the maintenance worker"))?;
    let storage_dir = env::var("RETOUCH_STORAGE_DIR")
        .map_err(|_| anyhow::anyhow!("RETOUCH_STORAGE_DIR must be set for the maintenance worker"))?;

    let pool = create_pool(DatabaseConfig {
        url: database_url,
        ..Default::default()
    })
    .await?;
    run_migrations(&pool).await?;

    // The sweeper never dispatches; jobs are owned by the API process
    let (dispatcher, _jobs) = mpsc::unbounded_channel::<EnhancementJob>();
    let webhook_secret = env::var("RETOUCH_WEBHOOK_SECRET").unwrap_or_default();

    let services = CoreServices::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(FsAssetStorage::open(&storage_dir).await?),
        Arc::new(dispatcher),
        Arc::new(HmacSignatureVerifier::new(webhook_secret)),
        core,
    );

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(
        Sweeper::new(services, worker.stuck_after).run(worker.sweep_interval, shutdown.clone()),
    );

    tracing::info!(
        sweep_interval_secs = worker.sweep_interval.as_secs(),
        stuck_after_secs = worker.stuck_after.as_secs(),
        "Worker ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, exiting...");

    shutdown.cancel();
    sweeper.await?;

    Ok(())
}
