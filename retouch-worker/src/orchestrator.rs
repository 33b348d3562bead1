/// Enhancement job orchestrator
///
/// Receives `EnhancementJob`s from the lifecycle manager's dispatcher and
/// drives each one to a terminal photo state.
///
/// # Architecture
///
/// ```text
/// EnhancementOrchestrator
///   ├─> mpsc receiver: jobs from start_enhancement / retry
///   ├─> Semaphore: bounds concurrent provider calls
///   ├─> AssetStorage: load original, store enhanced image
///   ├─> EnhancementInvoker: timeout, retry, classification
///   └─> PhotoLifecycleManager: on_job_succeeded / on_job_failed
/// ```
///
/// # Shutdown
///
/// Cancelling the shutdown token stops intake. Jobs still queued are failed
/// as retryable so their authorizations are refunded; jobs already running
/// finish normally.
///
/// # Example
///
/// ```no_run
/// use retouch_shared::config::CoreConfig;
/// use retouch_shared::context::CoreServices;
/// use retouch_worker::invoker::EnhancementInvoker;
/// use retouch_worker::orchestrator::{EnhancementOrchestrator, OrchestratorConfig};
/// use retouch_worker::provider::MockProvider;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let (services, jobs) = CoreServices::in_memory(CoreConfig::default(), "secret");
/// let invoker = Arc::new(EnhancementInvoker::new(Arc::new(MockProvider::echo())));
/// let orchestrator = EnhancementOrchestrator::new(services, invoker, OrchestratorConfig::default());
///
/// let shutdown = orchestrator.shutdown_token();
/// tokio::spawn(orchestrator.run(jobs));
/// shutdown.cancel();
/// # Ok(())
/// # }
/// ```

use crate::invoker::{EnhancedImage, EnhancementInvoker};
use crate::timeout;
use retouch_shared::context::CoreServices;
use retouch_shared::error::CoreError;
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::models::photo::PhotoStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Reason recorded when the original image cannot be read
pub const ORIGINAL_UNAVAILABLE_REASON: &str = "original image unavailable";

/// Reason recorded when the enhanced image cannot be stored
pub const STORE_FAILED_REASON: &str = "failed to store enhanced image";

/// Reason recorded for jobs dropped at shutdown
pub const SHUTDOWN_REASON: &str = "worker shutting down";

/// Orchestrator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum concurrent provider calls
    pub concurrency: usize,

    /// Per-attempt provider timeout
    pub provider_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            provider_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

/// Runs enhancement jobs against the provider
pub struct EnhancementOrchestrator {
    services: CoreServices,
    invoker: Arc<EnhancementInvoker>,
    config: OrchestratorConfig,
    shutdown_token: CancellationToken,
}

impl EnhancementOrchestrator {
    pub fn new(
        services: CoreServices,
        invoker: Arc<EnhancementInvoker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            services,
            invoker,
            config: OrchestratorConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the orchestrator when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Processes jobs until shutdown or until every sender is gone
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<EnhancementJob>) -> anyhow::Result<()> {
        info!(concurrency = self.config.concurrency, "Enhancement orchestrator starting");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => {
                    self.abandon(job).await;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit?,
            };

            let services = self.services.clone();
            let invoker = self.invoker.clone();
            let provider_timeout = self.config.provider_timeout;
            let span = info_span!("enhancement", photo_id = %job.photo_id, attempt = job.attempt);

            tokio::spawn(
                async move {
                    process_job(&services, &invoker, provider_timeout, job).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }

        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            self.abandon(job).await;
        }

        // Wait for in-flight jobs
        let _all = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await?;

        info!("Enhancement orchestrator shut down");
        Ok(())
    }

    async fn abandon(&self, job: EnhancementJob) {
        warn!(photo_id = %job.photo_id, "Failing queued job at shutdown");
        report_failure(&self.services, &job, SHUTDOWN_REASON, true).await;
    }
}

/// Drives one job to a terminal photo state
pub async fn process_job(
    services: &CoreServices,
    invoker: &EnhancementInvoker,
    provider_timeout: Duration,
    job: EnhancementJob,
) {
    if !attempt_is_live(services, &job).await {
        return;
    }

    let original = match services.storage().get(&job.original_asset_ref).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(asset = %job.original_asset_ref, error = %e, "Failed to load original image");
            report_failure(services, &job, ORIGINAL_UNAVAILABLE_REASON, false).await;
            return;
        }
    };

    match invoker
        .invoke(original, &job.content_type, job.mode, provider_timeout)
        .await
    {
        Ok(image) => report_success(services, &job, image).await,
        Err(e) => report_failure(services, &job, e.reason(), e.is_retryable()).await,
    }
}

/// Whether the job's attempt is still the photo's in-flight attempt
///
/// Jobs settled by the sweeper or superseded by a retry while queued are
/// skipped before any provider call.
async fn attempt_is_live(services: &CoreServices, job: &EnhancementJob) -> bool {
    match services.store().find_photo(job.photo_id).await {
        Ok(Some(photo))
            if photo.status == PhotoStatus::Processing && photo.retry_count == job.attempt =>
        {
            true
        }
        Ok(Some(photo)) => {
            debug!(
                photo_id = %job.photo_id,
                status = %photo.status,
                attempt = job.attempt,
                current_attempt = photo.retry_count,
                "Skipping job for a settled attempt"
            );
            false
        }
        Ok(None) => {
            debug!(photo_id = %job.photo_id, "Skipping job for a deleted photo");
            false
        }
        // Let the callbacks decide once the store answers again
        Err(e) => {
            warn!(photo_id = %job.photo_id, error = %e, "Could not check photo before enhancing");
            true
        }
    }
}

async fn report_success(services: &CoreServices, job: &EnhancementJob, image: EnhancedImage) {
    let size = image.size_bytes();
    let content_type = image.content_type();
    let asset = match services.storage().put(image.bytes, content_type).await {
        Ok(asset) => asset,
        Err(e) => {
            error!(error = %e, "Failed to store enhanced image");
            report_failure(services, job, STORE_FAILED_REASON, true).await;
            return;
        }
    };

    match services.lifecycle().on_job_succeeded(job, &asset, size).await {
        Ok(photo) => debug!(status = %photo.status, "Enhancement recorded"),
        Err(CoreError::Conflict(reason)) => {
            // Nothing references the stored image
            debug!(reason = %reason, "Discarding result for a settled attempt");
            if let Err(e) = services.storage().delete(&asset).await {
                warn!(asset = %asset, error = %e, "Failed to remove discarded image");
            }
        }
        Err(e) => error!(asset = %asset, error = %e, "Failed to record enhancement"),
    }
}

async fn report_failure(services: &CoreServices, job: &EnhancementJob, reason: &str, retryable: bool) {
    match services.lifecycle().on_job_failed(job, reason, retryable).await {
        Ok(_) => {}
        Err(CoreError::Conflict(reason)) => {
            debug!(reason = %reason, "Ignoring failure for a settled attempt")
        }
        Err(e) => error!(error = %e, "Failed to record enhancement failure"),
    }
}
