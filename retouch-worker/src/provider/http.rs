/// HTTP enhancement provider
///
/// ```text
/// POST {base_url}/v1/enhance?mode=<mode>
/// Authorization: Bearer <api key>
/// Content-Type: <original content type>
///
/// <image bytes>
/// ```
///
/// A 2xx answer carries the enhanced image as the body. 4xx answers with a
/// JSON `{"error": "..."}` body are reported as `Rejected` for 400/415/422.

use super::{EnhancementProvider, ProviderError, ProviderResponse};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use retouch_shared::models::photo::EnhancementMode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Provider reached over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/enhance", self.base_url)
    }
}

#[async_trait]
impl EnhancementProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn enhance(
        &self,
        original: Bytes,
        content_type: &str,
        mode: EnhancementMode,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .query(&[("mode", mode.as_str())])
            .header(CONTENT_TYPE, content_type)
            .body(original);

        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), mode = %mode, "Provider responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await.map_err(transport_error)?;

        Ok(ProviderResponse {
            bytes,
            content_type,
        })
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::Rejected(message),
        _ => ProviderError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
