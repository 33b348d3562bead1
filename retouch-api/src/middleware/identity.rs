/// Caller identity
///
/// Authentication happens at the gateway in front of this service, which
/// forwards the authenticated user id in a header:
///
/// ```text
/// X-User-Id: 550e8400-e29b-41d4-a716-446655440000
/// ```
///
/// The middleware parses the id, opens an account on first sight, and
/// inserts an `Identity` into request extensions for the handlers.

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
}

/// Requires a valid `X-User-Id` header
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;

    let user_id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::Unauthorized(format!("Invalid {} header", USER_ID_HEADER)))?;

    state.services.ensure_user(user_id).await?;
    req.extensions_mut().insert(Identity { user_id });

    Ok(next.run(req).await)
}
