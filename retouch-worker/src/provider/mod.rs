/// AI enhancement providers
///
/// A provider turns an original image into an enhanced one. It makes exactly
/// one call per `enhance` and reports what went wrong; timeouts, retries and
/// transient/permanent classification belong to the invoker.
///
/// # Providers
///
/// - **Http**: POSTs the image to an external enhancement service
/// - **Mock**: Replays a scripted sequence of results for tests and local runs
///
/// # Example
///
/// ```no_run
/// use retouch_worker::provider::{EnhancementProvider, MockProvider};
/// use retouch_shared::models::photo::EnhancementMode;
/// use bytes::Bytes;
///
/// # async fn example(jpeg: Bytes) -> Result<(), Box<dyn std::error::Error>> {
/// let provider = MockProvider::echo();
/// let response = provider.enhance(jpeg, "image/jpeg", EnhancementMode::Restore).await?;
/// println!("{} bytes of {}", response.bytes.len(), response.content_type);
/// # Ok(())
/// # }
/// ```

pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use retouch_shared::models::photo::EnhancementMode;
use thiserror::Error;

pub use http::HttpProvider;
pub use mock::MockProvider;

/// Provider call errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider did not answer in time
    #[error("provider timed out")]
    Timeout,

    /// Connection or protocol failure before a status was received
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The provider refused the image itself
    #[error("provider rejected image: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether a later attempt could succeed
    ///
    /// Timeouts, transport errors, 5xx, 408 and 429 are transient. Other
    /// statuses and rejections are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ProviderError::Rejected(_) => false,
        }
    }
}

/// Enhanced image returned by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub bytes: Bytes,
    pub content_type: String,
}

/// External image enhancement service
#[async_trait]
pub trait EnhancementProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Enhances `original` once
    async fn enhance(
        &self,
        original: Bytes,
        content_type: &str,
        mode: EnhancementMode,
    ) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> ProviderError {
        ProviderError::Status {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Transport("connection reset".into()).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(408).is_transient());
        assert!(status(429).is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(!status(400).is_transient());
        assert!(!status(415).is_transient());
        assert!(!status(422).is_transient());
        assert!(!ProviderError::Rejected("no faces found".into()).is_transient());
    }
}
