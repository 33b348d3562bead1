/// Error handling for the API server
///
/// A unified error type that maps to HTTP responses. Handlers return
/// `ApiResult<T>`; core errors convert with `?`.
///
/// # Status Mapping
///
/// | Core error                              | Status |
/// |-----------------------------------------|--------|
/// | `Validation`                            | 422    |
/// | `InsufficientCredits`                   | 402    |
/// | `Conflict`                              | 409    |
/// | `NotFound`                              | 404    |
/// | `InvalidSignature`                      | 401    |
/// | `InvalidReservationState`, anything else| 500    |
///
/// # Example
///
/// ```
/// use retouch_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler() -> ApiResult<Json<serde_json::Value>> {
///     Err(ApiError::NotFound("photo not found".to_string()))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use retouch_shared::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Payment required (402)
    InsufficientCredits(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409), e.g. a photo already being enhanced
    Conflict(String),

    /// Unprocessable entity (422)
    Validation(String),

    /// Internal server error (500)
    InternalError(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "not_found", "insufficient_credits")
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::InsufficientCredits(msg) => write!(f, "Insufficient credits: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InsufficientCredits(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::InsufficientCredits(_) => "insufficient_credits",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Validation(_) => "validation_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.code().to_string();

        let message = match self {
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::InsufficientCredits(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Validation(msg) => msg,
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

/// Convert core errors to API errors
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ApiError::Validation(msg),
            CoreError::InsufficientCredits { .. } => {
                ApiError::InsufficientCredits("No free enhancements or credits left".to_string())
            }
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            err @ CoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CoreError::InvalidSignature => {
                ApiError::Unauthorized("Invalid webhook signature".to_string())
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retouch_shared::models::reservation::ReservationState;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("photo not found".to_string());
        assert_eq!(err.to_string(), "Not found: photo not found");
    }

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (CoreError::Validation("bad mode".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                CoreError::InsufficientCredits { user_id: Uuid::new_v4() },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (CoreError::Conflict("busy".into()), StatusCode::CONFLICT),
            (CoreError::not_found("photo", Uuid::new_v4()), StatusCode::NOT_FOUND),
            (CoreError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (
                CoreError::FreeSlotUnderflow { user_id: Uuid::new_v4() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                CoreError::InvalidReservationState {
                    reservation_id: Uuid::new_v4(),
                    state: ReservationState::Committed,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (core, expected) in cases {
            assert_eq!(ApiError::from(core).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = ApiError::InternalError("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "internal_error");
        assert!(!body.message.contains("connection refused"));
    }
}
