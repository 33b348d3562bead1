/// Payment webhook endpoint
///
/// ```text
/// POST /v1/webhooks/payments
/// X-Retouch-Signature: sha256=<hex hmac of the raw body>
/// ```
///
/// The body is verified byte for byte, so it is taken raw rather than
/// through the `Json` extractor. Duplicate deliveries answer 200 with
/// `"outcome": "duplicate"` so the provider stops redelivering.

use crate::{app::AppState, error::ApiResult};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use retouch_shared::payments::{WebhookOutcome, SIGNATURE_HEADER};
use serde::{Deserialize, Serialize};

/// Webhook acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub outcome: WebhookOutcome,
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .services
        .payments()
        .handle_event(&body, signature)
        .await?;

    Ok(Json(WebhookResponse { outcome }))
}
