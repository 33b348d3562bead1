/// Photo endpoints
///
/// # Endpoints
///
/// - `POST /v1/photos?mode=restore` - Upload an image (raw body)
/// - `GET /v1/photos/:id` - Photo status
/// - `POST /v1/photos/:id/enhance` - Start the enhancement
/// - `POST /v1/photos/:id/retry` - Retry a failed enhancement
///
/// Uploads send the image bytes as the request body with their
/// `Content-Type`. Enhancement runs in the background; clients poll the
/// photo until it is `completed` or `failed`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::identity::Identity,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use retouch_shared::models::photo::{EnhancementMode, Photo, PhotoStatus};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Upload query parameters
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Requested enhancement
    pub mode: String,
}

/// Photo as returned to its owner
///
/// Only the enhanced asset reference is exposed; the original stays
/// internal.
#[derive(Debug, Serialize, Deserialize)]
pub struct PhotoResponse {
    pub id: Uuid,
    pub status: PhotoStatus,
    pub mode: EnhancementMode,
    pub content_type: String,
    pub original_size_bytes: i64,
    pub enhanced_asset_ref: Option<String>,
    pub enhanced_size_bytes: Option<i64>,
    pub error_reason: Option<String>,
    pub retryable: bool,
    pub retry_count: i32,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Photo> for PhotoResponse {
    fn from(photo: Photo) -> Self {
        Self {
            id: photo.id,
            status: photo.status,
            mode: photo.enhancement_mode,
            content_type: photo.content_type,
            original_size_bytes: photo.original_size_bytes,
            enhanced_asset_ref: photo.enhanced_asset_ref,
            enhanced_size_bytes: photo.enhanced_size_bytes,
            error_reason: photo.error_reason,
            retryable: photo.retryable,
            retry_count: photo.retry_count,
            processing_started_at: photo.processing_started_at,
            processing_completed_at: photo.processing_completed_at,
            created_at: photo.created_at,
            expires_at: photo.expires_at,
        }
    }
}

/// Upload handler
///
/// # Errors
///
/// - 400 if the `Content-Type` header is missing
/// - 422 for an unknown mode, an empty, oversized or unsupported image, or
///   an exceeded storage quota
pub async fn upload_photo(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PhotoResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Content-Type header".to_string()))?;

    let photo = state
        .services
        .lifecycle()
        .create_photo(identity.user_id, body, content_type, &query.mode)
        .await?;

    Ok((StatusCode::CREATED, Json(photo.into())))
}

/// Status handler
///
/// Photos owned by someone else are reported as not found.
pub async fn get_photo(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<Json<PhotoResponse>> {
    let photo = state
        .services
        .lifecycle()
        .get_photo(identity.user_id, photo_id)
        .await?;

    Ok(Json(photo.into()))
}

/// Start handler
///
/// # Errors
///
/// - 402 if the owner has no free enhancement or credit left
/// - 409 if the photo is not pending
pub async fn start_enhancement(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<PhotoResponse>)> {
    let photo = state
        .services
        .lifecycle()
        .start_enhancement(identity.user_id, photo_id)
        .await?;

    info!(photo_id = %photo.id, user_id = %identity.user_id, "Enhancement accepted");
    Ok((StatusCode::ACCEPTED, Json(photo.into())))
}

/// Retry handler
///
/// A retry is a new attempt and is charged like one.
pub async fn retry_enhancement(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<PhotoResponse>)> {
    let photo = state
        .services
        .lifecycle()
        .retry(identity.user_id, photo_id)
        .await?;

    info!(
        photo_id = %photo.id,
        user_id = %identity.user_id,
        attempt = photo.retry_count,
        "Retry accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(photo.into())))
}
