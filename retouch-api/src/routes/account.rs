/// Account endpoint
///
/// ```text
/// GET /v1/account
/// ```
///
/// ```json
/// {
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "credits": 4,
///   "unlimited": false,
///   "free_enhancements_used": 3,
///   "free_enhancements_remaining": 0,
///   "storage_used_bytes": 1048576,
///   "storage_limit_bytes": 524288000
/// }
/// ```

use crate::{app::AppState, error::ApiResult, middleware::identity::Identity};
use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Balance and quota summary
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub user_id: Uuid,
    pub credits: i32,
    pub unlimited: bool,
    pub free_enhancements_used: i32,
    pub free_enhancements_remaining: i32,
    pub storage_used_bytes: i64,
    pub storage_limit_bytes: i64,
}

pub async fn get_account(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<AccountResponse>> {
    let user = state.services.ledger().balance(identity.user_id).await?;
    let free_tier_limit = state.services.config().free_tier_limit;

    Ok(Json(AccountResponse {
        user_id: user.id,
        credits: user.credits,
        unlimited: user.is_unlimited(),
        free_enhancements_used: user.free_enhancements_used,
        free_enhancements_remaining: user.free_remaining(free_tier_limit),
        storage_used_bytes: user.storage_used_bytes,
        storage_limit_bytes: user.storage_limit_bytes,
    }))
}
