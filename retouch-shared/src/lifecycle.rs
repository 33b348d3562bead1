/// Photo lifecycle management
///
/// Owns the photo state machine and ties the quota enforcer, the credit
/// ledger and the enhancement worker together.
///
/// # State Machine
///
/// ```text
///            start_enhancement            on_enhancement_succeeded
/// pending ─────────────────────▶ processing ─────────────────────▶ completed
///                                 │    ▲
///            on_enhancement_failed│    │retry
///                                 ▼    │
///                                 failed
/// ```
///
/// # Transition Rules
///
/// - Every transition is a compare-and-set on the photo's status, so
///   concurrent callers produce exactly one winner and `Conflict` for the rest.
/// - Terminal transitions run first and settle the authorization second.
///   Only the caller that won the transition releases, so a duplicated worker
///   callback cannot refund twice. A release that fails after the transition
///   leaves a HELD reservation for the orphan sweep.
/// - Terminal callbacks are scoped to an attempt (`retry_count`). The
///   `on_job_*` variants check the attempt the job was issued for, so a late
///   callback from an earlier attempt cannot settle a newer one.
///
/// # Example
///
/// ```no_run
/// use retouch_shared::context::CoreServices;
/// use bytes::Bytes;
/// use uuid::Uuid;
///
/// # async fn example(services: CoreServices, owner: Uuid, jpeg: Bytes) -> anyhow::Result<()> {
/// let lifecycle = services.lifecycle();
///
/// let photo = lifecycle.create_photo(owner, jpeg, "image/jpeg", "restore").await?;
/// let photo = lifecycle.start_enhancement(owner, photo.id).await?;
/// println!("Photo {} is {}", photo.id, photo.status);
/// # Ok(())
/// # }
/// ```

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::media::check_image;
use crate::models::photo::{EnhancementMode, NewPhoto, Photo, PhotoStatus};
use crate::quota::{Authorization, Outcome, QuotaEnforcer};
use crate::storage::{AssetRef, AssetStorage};
use crate::store::Store;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failure reason recorded when the worker cannot be reached
pub const DISPATCH_FAILED_REASON: &str = "enhancement worker unavailable";

/// Work item handed to the enhancement worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementJob {
    pub photo_id: Uuid,
    pub owner_id: Uuid,
    pub original_asset_ref: AssetRef,
    pub content_type: String,
    pub mode: EnhancementMode,

    /// `retry_count` of the attempt this job belongs to
    pub attempt: i32,
}

impl EnhancementJob {
    /// Job for the photo's current attempt
    pub fn for_photo(photo: &Photo) -> Self {
        Self {
            photo_id: photo.id,
            owner_id: photo.owner_id,
            original_asset_ref: AssetRef::new(photo.original_asset_ref.clone()),
            content_type: photo.content_type.clone(),
            mode: photo.enhancement_mode,
            attempt: photo.retry_count,
        }
    }
}

/// The worker is no longer accepting jobs
#[derive(Debug, Error)]
#[error("enhancement dispatcher is closed")]
pub struct DispatchError;

/// Hands jobs to the enhancement worker without blocking
pub trait EnhancementDispatcher: Send + Sync {
    fn dispatch(&self, job: EnhancementJob) -> Result<(), DispatchError>;
}

impl EnhancementDispatcher for mpsc::UnboundedSender<EnhancementJob> {
    fn dispatch(&self, job: EnhancementJob) -> Result<(), DispatchError> {
        self.send(job).map_err(|_| DispatchError)
    }
}

/// Photo state machine and enhancement orchestration
#[derive(Clone)]
pub struct PhotoLifecycleManager {
    store: Arc<dyn Store>,
    storage: Arc<dyn AssetStorage>,
    quota: QuotaEnforcer,
    dispatcher: Arc<dyn EnhancementDispatcher>,
    config: CoreConfig,
}

impl PhotoLifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn AssetStorage>,
        quota: QuotaEnforcer,
        dispatcher: Arc<dyn EnhancementDispatcher>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            storage,
            quota,
            dispatcher,
            config,
        }
    }

    /// Validates and stores an upload as a PENDING photo
    ///
    /// # Errors
    ///
    /// - `Validation` for an unknown mode, an empty, oversized or
    ///   unsupported image, or an exceeded storage quota; nothing is stored
    /// - `NotFound` for an unknown owner
    pub async fn create_photo(
        &self,
        owner_id: Uuid,
        original: Bytes,
        content_type: &str,
        mode: &str,
    ) -> CoreResult<Photo> {
        let mode: EnhancementMode = mode.parse().map_err(CoreError::Validation)?;

        let size = original.len() as i64;
        if size > self.config.max_upload_bytes {
            return Err(CoreError::Validation(format!(
                "image is {} bytes, limit is {}",
                size, self.config.max_upload_bytes
            )));
        }

        let format = check_image(&original, content_type)
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        if self.store.reserve_storage(owner_id, size).await?.is_none() {
            return match self.store.find_user(owner_id).await? {
                Some(_) => Err(CoreError::Validation(
                    "storage quota exceeded".to_string(),
                )),
                None => Err(CoreError::not_found("user", owner_id)),
            };
        }

        let asset = match self.storage.put(original, format.content_type()).await {
            Ok(asset) => asset,
            Err(e) => {
                self.store.release_storage(owner_id, size).await?;
                return Err(e.into());
            }
        };

        let inserted = self
            .store
            .insert_photo(NewPhoto {
                owner_id,
                original_asset_ref: asset.to_string(),
                enhancement_mode: mode,
                content_type: format.content_type().to_string(),
                original_size_bytes: size,
                expires_at: Utc::now() + self.config.photo_ttl(),
            })
            .await;

        match inserted {
            Ok(photo) => {
                info!(
                    photo_id = %photo.id,
                    owner_id = %owner_id,
                    mode = %mode,
                    size_bytes = size,
                    "Photo uploaded"
                );
                Ok(photo)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&asset).await {
                    warn!(asset = %asset, error = %cleanup, "Failed to remove orphaned upload");
                }
                self.store.release_storage(owner_id, size).await?;
                Err(e)
            }
        }
    }

    /// Authorizes and starts the first enhancement of a PENDING photo
    ///
    /// Returns the photo in PROCESSING. The provider call runs on the worker.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the photo is not PENDING or a concurrent start won
    /// - `InsufficientCredits` if the owner cannot pay; the photo stays PENDING
    pub async fn start_enhancement(&self, owner_id: Uuid, photo_id: Uuid) -> CoreResult<Photo> {
        self.begin_attempt(owner_id, photo_id, PhotoStatus::Pending).await
    }

    /// Starts a fresh, separately paid attempt for a FAILED photo
    pub async fn retry(&self, owner_id: Uuid, photo_id: Uuid) -> CoreResult<Photo> {
        self.begin_attempt(owner_id, photo_id, PhotoStatus::Failed).await
    }

    /// Reads a photo owned by `owner_id`
    pub async fn get_photo(&self, owner_id: Uuid, photo_id: Uuid) -> CoreResult<Photo> {
        self.owned_photo(owner_id, photo_id).await
    }

    /// Records a successful enhancement and commits its authorization
    pub async fn on_enhancement_succeeded(
        &self,
        photo_id: Uuid,
        enhanced_asset_ref: &AssetRef,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Photo> {
        self.succeed_attempt(photo_id, None, enhanced_asset_ref, enhanced_size_bytes)
            .await
    }

    /// Records a failed enhancement and refunds its authorization
    ///
    /// No automatic retry happens; the owner may call `retry`.
    pub async fn on_enhancement_failed(
        &self,
        photo_id: Uuid,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Photo> {
        self.fail_attempt(photo_id, None, reason, retryable).await
    }

    /// `on_enhancement_succeeded` scoped to the attempt `job` was issued for
    ///
    /// Returns `Conflict` if the photo has since moved on to another attempt.
    pub async fn on_job_succeeded(
        &self,
        job: &EnhancementJob,
        enhanced_asset_ref: &AssetRef,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Photo> {
        self.succeed_attempt(
            job.photo_id,
            Some(job.attempt),
            enhanced_asset_ref,
            enhanced_size_bytes,
        )
        .await
    }

    /// `on_enhancement_failed` scoped to the attempt `job` was issued for
    pub async fn on_job_failed(
        &self,
        job: &EnhancementJob,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Photo> {
        self.fail_attempt(job.photo_id, Some(job.attempt), reason, retryable)
            .await
    }

    async fn succeed_attempt(
        &self,
        photo_id: Uuid,
        attempt: Option<i32>,
        enhanced_asset_ref: &AssetRef,
        enhanced_size_bytes: i64,
    ) -> CoreResult<Photo> {
        let snapshot = self.processing_photo(photo_id, attempt).await?;
        let authorization = authorization_of(&snapshot);

        let photo = self
            .store
            .complete_photo(
                photo_id,
                snapshot.retry_count,
                enhanced_asset_ref.as_str(),
                enhanced_size_bytes,
            )
            .await?
            .ok_or_else(|| lost_transition(photo_id))?;

        self.store
            .add_storage(photo.owner_id, enhanced_size_bytes)
            .await?;

        info!(
            photo_id = %photo_id,
            owner_id = %photo.owner_id,
            attempt = photo.retry_count,
            free_slot = authorization.used_free_slot,
            "Enhancement completed"
        );

        self.settle(&photo, &authorization, Outcome::Success).await?;
        Ok(photo)
    }

    async fn fail_attempt(
        &self,
        photo_id: Uuid,
        attempt: Option<i32>,
        reason: &str,
        retryable: bool,
    ) -> CoreResult<Photo> {
        let snapshot = self.processing_photo(photo_id, attempt).await?;
        let authorization = authorization_of(&snapshot);

        let photo = self
            .store
            .fail_photo(photo_id, snapshot.retry_count, reason, retryable)
            .await?
            .ok_or_else(|| lost_transition(photo_id))?;

        warn!(
            photo_id = %photo_id,
            owner_id = %photo.owner_id,
            attempt = photo.retry_count,
            reason = %reason,
            retryable,
            "Enhancement failed"
        );

        self.settle(&photo, &authorization, Outcome::Failure).await?;
        Ok(photo)
    }

    async fn begin_attempt(
        &self,
        owner_id: Uuid,
        photo_id: Uuid,
        from: PhotoStatus,
    ) -> CoreResult<Photo> {
        let photo = self.owned_photo(owner_id, photo_id).await?;
        if photo.status != from {
            return Err(CoreError::Conflict(format!(
                "photo {} is {}, expected {}",
                photo_id, photo.status, from
            )));
        }

        let authorization = self.quota.authorize(owner_id).await?;

        let claimed = self
            .store
            .begin_processing(
                photo_id,
                from,
                authorization.reservation_id,
                authorization.used_free_slot,
            )
            .await;

        let photo = match claimed {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                debug!(photo_id = %photo_id, "Lost start race, releasing authorization");
                self.release_unused(owner_id, &authorization).await;
                return Err(CoreError::Conflict(format!(
                    "photo {} is already being enhanced",
                    photo_id
                )));
            }
            Err(e) => {
                self.release_unused(owner_id, &authorization).await;
                return Err(e);
            }
        };

        info!(
            photo_id = %photo_id,
            owner_id = %owner_id,
            attempt = photo.retry_count,
            free_slot = authorization.used_free_slot,
            "Enhancement started"
        );

        if let Err(e) = self.dispatcher.dispatch(EnhancementJob::for_photo(&photo)) {
            error!(photo_id = %photo_id, error = %e, "Failed to dispatch enhancement job");
            return self
                .fail_attempt(photo_id, Some(photo.retry_count), DISPATCH_FAILED_REASON, true)
                .await;
        }

        Ok(photo)
    }

    async fn owned_photo(&self, owner_id: Uuid, photo_id: Uuid) -> CoreResult<Photo> {
        match self.store.find_photo(photo_id).await? {
            Some(photo) if photo.owner_id == owner_id => Ok(photo),
            _ => Err(CoreError::not_found("photo", photo_id)),
        }
    }

    async fn processing_photo(&self, photo_id: Uuid, attempt: Option<i32>) -> CoreResult<Photo> {
        let photo = self
            .store
            .find_photo(photo_id)
            .await?
            .ok_or_else(|| CoreError::not_found("photo", photo_id))?;

        if photo.status != PhotoStatus::Processing {
            return Err(CoreError::Conflict(format!(
                "photo {} is {}, expected processing",
                photo_id, photo.status
            )));
        }

        if let Some(attempt) = attempt {
            if photo.retry_count != attempt {
                return Err(CoreError::Conflict(format!(
                    "photo {} is on attempt {}, callback was for attempt {}",
                    photo_id, photo.retry_count, attempt
                )));
            }
        }

        Ok(photo)
    }

    /// Settles the authorization of a finished attempt
    async fn settle(
        &self,
        photo: &Photo,
        authorization: &Authorization,
        outcome: Outcome,
    ) -> CoreResult<()> {
        if let Err(e) = self.quota.release(photo.owner_id, authorization, outcome).await {
            error!(
                photo_id = %photo.id,
                owner_id = %photo.owner_id,
                reservation_id = ?authorization.reservation_id,
                error = %e,
                "Failed to settle authorization"
            );
            return Err(e);
        }
        Ok(())
    }

    /// Gives back an authorization that never reached a photo
    async fn release_unused(&self, owner_id: Uuid, authorization: &Authorization) {
        if let Err(e) = self
            .quota
            .release(owner_id, authorization, Outcome::Failure)
            .await
        {
            error!(
                owner_id = %owner_id,
                reservation_id = ?authorization.reservation_id,
                error = %e,
                "Failed to release unused authorization"
            );
        }
    }
}

fn authorization_of(photo: &Photo) -> Authorization {
    Authorization {
        used_free_slot: photo.used_free_slot,
        reservation_id: photo.credit_reservation_id,
    }
}

fn lost_transition(photo_id: Uuid) -> CoreError {
    CoreError::Conflict(format!("photo {} was settled concurrently", photo_id))
}
