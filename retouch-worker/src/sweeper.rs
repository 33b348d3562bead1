/// Maintenance sweeps
///
/// Periodic recovery for work the request path cannot finish on its own:
///
/// 1. **Stuck processing**: photos PROCESSING longer than `stuck_after` are
///    failed as retryable, which refunds their authorization
/// 2. **Orphaned reservations**: HELD reservations older than `stuck_after`
///    that no PROCESSING photo references are refunded
/// 3. **Expiry**: photos past `expires_at` that are not PROCESSING are
///    deleted along with their assets, and their bytes are released
///
/// Every pass takes an explicit `now` so it can be driven deterministically.

use chrono::{DateTime, Utc};
use retouch_shared::context::CoreServices;
use retouch_shared::error::{CoreError, CoreResult};
use retouch_shared::lifecycle::EnhancementJob;
use retouch_shared::models::photo::Photo;
use retouch_shared::storage::AssetRef;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded on photos failed by the stuck sweep
pub const STUCK_REASON: &str = "processing timed out";

/// Rows handled per step per pass
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stuck_failed: usize,
    pub reservations_refunded: usize,
    pub photos_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs the maintenance sweeps
pub struct Sweeper {
    services: CoreServices,
    stuck_after: chrono::Duration,
    batch_size: i64,
}

impl Sweeper {
    pub fn new(services: CoreServices, stuck_after: Duration) -> Self {
        Self {
            services,
            stuck_after: chrono::Duration::from_std(stuck_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(900)),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs one pass of every sweep
    ///
    /// A failing step is logged and does not prevent the others.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = now - self.stuck_after;

        match self.fail_stuck(cutoff).await {
            Ok(count) => report.stuck_failed = count,
            Err(e) => error!(error = %e, "Stuck photo sweep failed"),
        }
        match self.refund_orphans(cutoff).await {
            Ok(count) => report.reservations_refunded = count,
            Err(e) => error!(error = %e, "Orphaned reservation sweep failed"),
        }
        match self.expire_photos(now).await {
            Ok(count) => report.photos_expired = count,
            Err(e) => error!(error = %e, "Photo expiry sweep failed"),
        }

        if !report.is_empty() {
            info!(
                stuck_failed = report.stuck_failed,
                reservations_refunded = report.reservations_refunded,
                photos_expired = report.photos_expired,
                "Maintenance sweep completed"
            );
        }
        report
    }

    /// Sweeps every `interval` until `shutdown` is cancelled
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Maintenance sweeper starting");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once(Utc::now()).await;
                }
            }
        }

        info!("Maintenance sweeper stopped");
    }

    async fn fail_stuck(&self, started_before: DateTime<Utc>) -> CoreResult<usize> {
        let stuck = self
            .services
            .store()
            .list_stuck_photos(started_before, self.batch_size)
            .await?;

        let mut failed = 0;
        for photo in stuck {
            // Scoped to the attempt that was listed
            let job = EnhancementJob::for_photo(&photo);
            match self
                .services
                .lifecycle()
                .on_job_failed(&job, STUCK_REASON, true)
                .await
            {
                Ok(_) => {
                    warn!(photo_id = %photo.id, attempt = photo.retry_count, "Failed stuck enhancement");
                    failed += 1;
                }
                Err(CoreError::Conflict(_)) => {
                    debug!(photo_id = %photo.id, "Stuck photo settled concurrently")
                }
                Err(e) => error!(photo_id = %photo.id, error = %e, "Failed to fail stuck photo"),
            }
        }
        Ok(failed)
    }

    async fn refund_orphans(&self, created_before: DateTime<Utc>) -> CoreResult<usize> {
        let orphaned = self
            .services
            .store()
            .list_orphaned_reservations(created_before, self.batch_size)
            .await?;

        let mut refunded = 0;
        for reservation in orphaned {
            match self.services.ledger().refund(reservation.id).await {
                Ok(_) => {
                    warn!(
                        reservation_id = %reservation.id,
                        user_id = %reservation.user_id,
                        "Refunded orphaned reservation"
                    );
                    refunded += 1;
                }
                Err(e) => debug!(reservation_id = %reservation.id, error = %e, "Orphan not refunded"),
            }
        }
        Ok(refunded)
    }

    async fn expire_photos(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let expired = self
            .services
            .store()
            .delete_expired_photos(now, self.batch_size)
            .await?;

        let count = expired.len();
        for photo in expired {
            self.remove_assets(&photo).await;
            if let Err(e) = self
                .services
                .store()
                .release_storage(photo.owner_id, photo.stored_bytes())
                .await
            {
                error!(photo_id = %photo.id, error = %e, "Failed to release storage of expired photo");
            }
            debug!(photo_id = %photo.id, owner_id = %photo.owner_id, "Expired photo");
        }
        Ok(count)
    }

    async fn remove_assets(&self, photo: &Photo) {
        let assets = std::iter::once(photo.original_asset_ref.clone())
            .chain(photo.enhanced_asset_ref.clone())
            .map(AssetRef::new);

        for asset in assets {
            if let Err(e) = self.services.storage().delete(&asset).await {
                warn!(photo_id = %photo.id, asset = %asset, error = %e, "Failed to delete asset");
            }
        }
    }
}
