/// Photo model and database operations
///
/// A photo is created PENDING at upload and driven through the enhancement
/// state machine by the lifecycle manager. Every transition is a
/// compare-and-set on `status`, so concurrent callers race on a single row
/// update and exactly one of them wins.
///
/// # State Machine
///
/// ```text
/// pending → processing → completed
///                      → failed → processing   (explicit user retry)
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE photo_status AS ENUM ('pending', 'processing', 'completed', 'failed');
/// CREATE TYPE enhancement_mode AS ENUM ('restore', 'enhance', 'colorize', 'upscale');
///
/// CREATE TABLE photos (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     owner_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     original_asset_ref TEXT NOT NULL,
///     enhanced_asset_ref TEXT,
///     status photo_status NOT NULL DEFAULT 'pending',
///     enhancement_mode enhancement_mode NOT NULL,
///     content_type VARCHAR(64) NOT NULL,
///     credit_reservation_id UUID REFERENCES credit_reservations(id),
///     used_free_slot BOOLEAN NOT NULL DEFAULT FALSE,
///     processing_started_at TIMESTAMPTZ,
///     processing_completed_at TIMESTAMPTZ,
///     error_reason TEXT,
///     retryable BOOLEAN NOT NULL DEFAULT FALSE,
///     retry_count INTEGER NOT NULL DEFAULT 0,
///     original_size_bytes BIGINT NOT NULL,
///     enhanced_size_bytes BIGINT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     expires_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use retouch_shared::models::photo::{Photo, NewPhoto, PhotoStatus, EnhancementMode};
/// use retouch_shared::db::pool::{create_pool, DatabaseConfig};
/// use chrono::{Duration, Utc};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let photo = Photo::create(&pool, NewPhoto {
///     owner_id: Uuid::new_v4(),
///     original_asset_ref: "mem://originals/1".to_string(),
///     enhancement_mode: EnhancementMode::Restore,
///     content_type: "image/jpeg".to_string(),
///     original_size_bytes: 2048,
///     expires_at: Utc::now() + Duration::days(7),
/// }).await?;
///
/// // Claim the photo for processing with a free slot
/// let claimed = Photo::begin_processing(&pool, photo.id, PhotoStatus::Pending, None, true).await?;
/// assert!(claimed.is_some());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const PHOTO_COLUMNS: &str = "id, owner_id, original_asset_ref, enhanced_asset_ref, status, \
                             enhancement_mode, content_type, credit_reservation_id, used_free_slot, \
                             processing_started_at, processing_completed_at, error_reason, \
                             retryable, retry_count, original_size_bytes, enhanced_size_bytes, \
                             created_at, expires_at";

/// Photo processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "photo_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    /// Uploaded, not yet enhanced
    Pending,

    /// Authorized and handed to the provider
    Processing,

    /// Enhanced asset available
    Completed,

    /// Enhancement failed; may be retried by the user
    Failed,
}

impl PhotoStatus {
    /// Converts status to string
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Completed => "completed",
            PhotoStatus::Failed => "failed",
        }
    }

    /// Checks if status is terminal for the current attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhotoStatus::Completed | PhotoStatus::Failed)
    }

    /// Checks if transition to target status is valid
    pub fn can_transition_to(&self, target: PhotoStatus) -> bool {
        matches!(
            (self, target),
            (PhotoStatus::Pending, PhotoStatus::Processing)
                | (PhotoStatus::Processing, PhotoStatus::Completed)
                | (PhotoStatus::Processing, PhotoStatus::Failed)
                | (PhotoStatus::Failed, PhotoStatus::Processing)
        )
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enhancement requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "enhancement_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnhancementMode {
    Restore,
    Enhance,
    Colorize,
    Upscale,
}

impl EnhancementMode {
    /// All supported modes
    pub const ALL: [EnhancementMode; 4] = [
        EnhancementMode::Restore,
        EnhancementMode::Enhance,
        EnhancementMode::Colorize,
        EnhancementMode::Upscale,
    ];

    /// Converts mode to string
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancementMode::Restore => "restore",
            EnhancementMode::Enhance => "enhance",
            EnhancementMode::Colorize => "colorize",
            EnhancementMode::Upscale => "upscale",
        }
    }
}

impl fmt::Display for EnhancementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnhancementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnhancementMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown enhancement mode '{}'", s))
    }
}

/// Photo record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Photo {
    /// Photo id
    pub id: Uuid,

    /// Owning user
    pub owner_id: Uuid,

    /// Storage reference of the uploaded image
    pub original_asset_ref: String,

    /// Storage reference of the enhanced image (set iff completed)
    pub enhanced_asset_ref: Option<String>,

    /// Current status
    pub status: PhotoStatus,

    /// Requested enhancement
    pub enhancement_mode: EnhancementMode,

    /// Declared content type of the original
    pub content_type: String,

    /// Reservation held while processing on a paid credit
    pub credit_reservation_id: Option<Uuid>,

    /// Whether the in-flight attempt consumed a free slot
    pub used_free_slot: bool,

    /// When the current/last attempt started
    pub processing_started_at: Option<DateTime<Utc>>,

    /// When the last attempt reached a terminal status
    pub processing_completed_at: Option<DateTime<Utc>>,

    /// Failure reason of the last attempt
    pub error_reason: Option<String>,

    /// Whether the last failure was classified as retryable
    pub retryable: bool,

    /// Number of user-initiated retries
    pub retry_count: i32,

    /// Size of the original image
    pub original_size_bytes: i64,

    /// Size of the enhanced image
    pub enhanced_size_bytes: Option<i64>,

    /// Upload time
    pub created_at: DateTime<Utc>,

    /// When the photo and its assets are swept
    pub expires_at: DateTime<Utc>,
}

/// Input for creating a photo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhoto {
    pub owner_id: Uuid,
    pub original_asset_ref: String,
    pub enhancement_mode: EnhancementMode,
    pub content_type: String,
    pub original_size_bytes: i64,
    pub expires_at: DateTime<Utc>,
}

impl Photo {
    /// Whether the photo currently holds a reservation or a free slot
    pub fn holds_authorization(&self) -> bool {
        self.credit_reservation_id.is_some() || self.used_free_slot
    }

    /// Checks the status/field invariants of the record
    ///
    /// `enhanced_asset_ref` is set iff completed, and an authorization is held
    /// iff processing.
    pub fn is_consistent(&self) -> bool {
        let completed = self.status == PhotoStatus::Completed;
        let processing = self.status == PhotoStatus::Processing;
        let exclusive = !(self.credit_reservation_id.is_some() && self.used_free_slot);

        completed == self.enhanced_asset_ref.is_some()
            && processing == self.holds_authorization()
            && exclusive
    }

    /// Total bytes this photo occupies in storage
    pub fn stored_bytes(&self) -> i64 {
        self.original_size_bytes + self.enhanced_size_bytes.unwrap_or(0)
    }

    /// Creates a photo in pending status
    pub async fn create(pool: &PgPool, data: NewPhoto) -> Result<Self, sqlx::Error> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            r#"
            INSERT INTO photos (owner_id, original_asset_ref, enhancement_mode, content_type,
                                original_size_bytes, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(data.owner_id)
        .bind(data.original_asset_ref)
        .bind(data.enhancement_mode)
        .bind(data.content_type)
        .bind(data.original_size_bytes)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await?;

        Ok(photo)
    }

    /// Finds a photo by id
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(photo)
    }

    /// Transitions `from` → processing and records the authorization
    ///
    /// `from` is pending for a first attempt and failed for a user retry; the
    /// retry counter only moves on the latter. Returns `None` if the photo is
    /// no longer in `from` (another caller won the race).
    pub async fn begin_processing(
        pool: &PgPool,
        id: Uuid,
        from: PhotoStatus,
        reservation_id: Option<Uuid>,
        used_free_slot: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            r#"
            UPDATE photos
            SET status = 'processing',
                credit_reservation_id = $3,
                used_free_slot = $4,
                processing_started_at = NOW(),
                processing_completed_at = NULL,
                error_reason = NULL,
                retryable = FALSE,
                retry_count = retry_count + CASE WHEN $2 = 'failed'::photo_status THEN 1 ELSE 0 END
            WHERE id = $1 AND status = $2
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from)
        .bind(reservation_id)
        .bind(used_free_slot)
        .fetch_optional(pool)
        .await?;

        Ok(photo)
    }

    /// Transitions processing → completed
    ///
    /// `attempt` is the `retry_count` observed when the caller read the
    /// photo; the update only applies to that same attempt.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        attempt: i32,
        enhanced_asset_ref: &str,
        enhanced_size_bytes: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            r#"
            UPDATE photos
            SET status = 'completed',
                enhanced_asset_ref = $2,
                enhanced_size_bytes = $3,
                credit_reservation_id = NULL,
                used_free_slot = FALSE,
                processing_completed_at = NOW()
            WHERE id = $1 AND status = 'processing' AND retry_count = $4
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(enhanced_asset_ref)
        .bind(enhanced_size_bytes)
        .bind(attempt)
        .fetch_optional(pool)
        .await?;

        Ok(photo)
    }

    /// Transitions processing → failed, for the same attempt as `complete`
    pub async fn fail(
        pool: &PgPool,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retryable: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            r#"
            UPDATE photos
            SET status = 'failed',
                error_reason = $2,
                retryable = $3,
                credit_reservation_id = NULL,
                used_free_slot = FALSE,
                processing_completed_at = NOW()
            WHERE id = $1 AND status = 'processing' AND retry_count = $4
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .bind(retryable)
        .bind(attempt)
        .fetch_optional(pool)
        .await?;

        Ok(photo)
    }

    /// Lists photos stuck in processing since before `started_before`
    pub async fn list_stuck(
        pool: &PgPool,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let photos = sqlx::query_as::<_, Photo>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE status = 'processing' AND processing_started_at < $1
            ORDER BY processing_started_at ASC
            LIMIT $2
            "#
        ))
        .bind(started_before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(photos)
    }

    /// Deletes expired photos that are not mid-flight
    ///
    /// Returns the deleted rows so their assets and storage usage can be
    /// released.
    pub async fn delete_expired(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let photos = sqlx::query_as::<_, Photo>(&format!(
            r#"
            DELETE FROM photos
            WHERE id IN (
                SELECT id FROM photos
                WHERE expires_at <= $1 AND status <> 'processing'
                ORDER BY expires_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(photos)
    }
}
