//! # Retouch API Server
//!
//! Accepts photo uploads, starts paid or free-tier enhancements, serves
//! their status and applies payment webhooks. Enhancement jobs run in this
//! process on the embedded worker.
//!
//! ## Usage
//!
//! ```bash
//! RETOUCH_WEBHOOK_SECRET=... cargo run -p retouch-api
//! ```
//!
//! Without `DATABASE_URL` the server keeps all state in memory, and without
//! `RETOUCH_STORAGE_DIR` images are held in memory too.

use retouch_api::{
    app::{build_router, AppState},
    config::Config,
};
use retouch_shared::context::CoreServices;
use retouch_shared::db::migrations::run_migrations;
use retouch_shared::db::pool::{create_pool, DatabaseConfig};
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::payments::HmacSignatureVerifier;
use retouch_shared::storage::{AssetStorage, FsAssetStorage, MemoryAssetStorage};
use retouch_shared::store::{MemoryStore, PgStore, Store};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "retouch_api=debug,retouch_worker=info,retouch_shared=info,tower_http=debug".into()
    });
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

    tracing::info!(
        "Retouch API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database {
        Some(database) => {
            let pool = create_pool(DatabaseConfig {
                url: database.url.clone(),
                max_connections: database.max_connections,
                ..Default::default()
            })
            .await?;
            run_migrations(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let storage: Arc<dyn AssetStorage> = match &config.storage_dir {
        Some(dir) => Arc::new(FsAssetStorage::open(dir).await?),
        None => {
            tracing::warn!("RETOUCH_STORAGE_DIR not set, images are kept in memory");
            Arc::new(MemoryAssetStorage::new())
        }
    };

    let (dispatcher, jobs) = mpsc::unbounded_channel::<EnhancementJob>();
    let services = CoreServices::new(
        store,
        storage,
        Arc::new(dispatcher),
        Arc::new(HmacSignatureVerifier::new(config.webhook.secret.as_bytes())),
        config.core.clone(),
    );

    let worker = retouch_worker::start(services.clone(), jobs, &config.worker, config.run_sweeper);

    let address = config.bind_address();
    let app = build_router(AppState::new(services, config));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining enhancement jobs...");
    worker.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received, exiting...");
}
