//! # Retouch Worker Library
//!
//! Runs photo enhancements against the AI provider and the periodic
//! maintenance sweeps.
//!
//! ## Modules
//!
//! - `provider`: `EnhancementProvider` trait with HTTP and mock providers
//! - `invoker`: Timeout, retry and failure classification around a provider
//! - `orchestrator`: Consumes dispatched jobs and reports results
//! - `sweeper`: Stuck photo, orphaned reservation and expiry sweeps
//! - `timeout`: Provider timeout bounds
//! - `config`: Worker settings
//!
//! ## Example
//!
//! ```no_run
//! use retouch_shared::config::CoreConfig;
//! use retouch_shared::context::CoreServices;
//! use retouch_worker::config::WorkerConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (services, jobs) = CoreServices::in_memory(CoreConfig::default(), "secret");
//! let worker = retouch_worker::start(services, jobs, &WorkerConfig::default(), true);
//!
//! // ...
//!
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod invoker;
pub mod orchestrator;
pub mod provider;
pub mod sweeper;
pub mod timeout;

use config::WorkerConfig;
use invoker::EnhancementInvoker;
use orchestrator::{EnhancementOrchestrator, OrchestratorConfig};
use retouch_shared::context::CoreServices;
use retouch_shared::lifecycle::EnhancementJob;
use std::sync::Arc;
use sweeper::Sweeper;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running orchestrator and sweeper tasks
pub struct WorkerHandle {
    shutdown: CancellationToken,
    orchestrator: JoinHandle<anyhow::Result<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stops intake, lets in-flight jobs finish and waits for both tasks
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper {
            sweeper.await?;
        }
        self.orchestrator.await?
    }
}

/// Spawns the orchestrator over `jobs`, and the maintenance sweeper when
/// `with_sweeper` is set
///
/// Deployments with several API processes run the sweeper in one place
/// only, either one API process or the standalone worker binary.
pub fn start(
    services: CoreServices,
    jobs: mpsc::UnboundedReceiver<EnhancementJob>,
    config: &WorkerConfig,
    with_sweeper: bool,
) -> WorkerHandle {
    let invoker = Arc::new(EnhancementInvoker::new(config.build_provider()));
    let orchestrator = EnhancementOrchestrator::new(
        services.clone(),
        invoker,
        OrchestratorConfig {
            concurrency: config.concurrency,
            provider_timeout: config.provider_timeout,
        },
    );
    let shutdown = orchestrator.shutdown_token();

    let sweeper = with_sweeper.then(|| {
        let sweeper = Sweeper::new(services, config.stuck_after);
        tokio::spawn(sweeper.run(config.sweep_interval, shutdown.clone()))
    });

    WorkerHandle {
        sweeper,
        orchestrator: tokio::spawn(orchestrator.run(jobs)),
        shutdown,
    }
}
