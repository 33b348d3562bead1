/// Enhancement invoker
///
/// Wraps a provider with a per-attempt timeout, bounded retries with
/// exponential backoff, and failure classification. It knows nothing about
/// credits or photo state: callers get either an enhanced image or a single
/// `InvokeError::Permanent`.
///
/// # Retry Policy
///
/// ```text
/// attempt 1 ──transient──▶ wait 2s ──▶ attempt 2 ──transient──▶ wait 4s ──▶ attempt 3
///     │                                    │                                    │
///     └──permanent──▶ Permanent            └──permanent──▶ Permanent            └──transient──▶ Permanent { exhausted }
/// ```
///
/// Delay before attempt n+1 is `min(base * 2^(n-1), cap)`.
///
/// # Example
///
/// ```no_run
/// use retouch_worker::invoker::EnhancementInvoker;
/// use retouch_worker::provider::MockProvider;
/// use retouch_shared::models::photo::EnhancementMode;
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(jpeg: Bytes) -> Result<(), Box<dyn std::error::Error>> {
/// let invoker = EnhancementInvoker::new(Arc::new(MockProvider::echo()));
/// let image = invoker
///     .invoke(jpeg, "image/jpeg", EnhancementMode::Upscale, Duration::from_secs(60))
///     .await?;
/// println!("Enhanced {} bytes", image.bytes.len());
/// # Ok(())
/// # }
/// ```

use crate::provider::{EnhancementProvider, ProviderError};
use crate::timeout;
use bytes::Bytes;
use retouch_shared::media::{check_image, ImageFormat};
use retouch_shared::models::photo::EnhancementMode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Total provider attempts per invocation
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Upper bound on a single backoff
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Attempt budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base: BACKOFF_BASE,
            cap: BACKOFF_CAP,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Longest an `invoke` can run with `timeout` per attempt
    ///
    /// Every attempt times out and every backoff is slept.
    pub fn worst_case(&self, timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let backoffs: Duration = (1..attempts).map(|attempt| self.backoff(attempt)).sum();
        timeout.saturating_mul(attempts).saturating_add(backoffs)
    }
}

/// Validated provider output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedImage {
    pub bytes: Bytes,
    pub format: ImageFormat,
}

impl EnhancedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn size_bytes(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// Terminal invocation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// No further attempt will be made
    ///
    /// `exhausted` is set when every attempt failed transiently, in which case
    /// a later retry may still succeed.
    #[error("enhancement failed: {reason}")]
    Permanent { reason: String, exhausted: bool },
}

impl InvokeError {
    fn permanent(reason: impl Into<String>) -> Self {
        InvokeError::Permanent {
            reason: reason.into(),
            exhausted: false,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            InvokeError::Permanent { reason, .. } => reason,
        }
    }

    /// Whether the owner should be offered a retry
    pub fn is_retryable(&self) -> bool {
        match self {
            InvokeError::Permanent { exhausted, .. } => *exhausted,
        }
    }
}

/// Failure of a single attempt
enum AttemptError {
    Transient(String),
    Permanent(String),
}

/// Calls the provider with timeout, retry and classification
pub struct EnhancementInvoker {
    provider: Arc<dyn EnhancementProvider>,
    policy: RetryPolicy,
}

impl EnhancementInvoker {
    pub fn new(provider: Arc<dyn EnhancementProvider>) -> Self {
        Self::with_policy(provider, RetryPolicy::default())
    }

    pub fn with_policy(provider: Arc<dyn EnhancementProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enhances `original`, retrying transient failures
    ///
    /// `timeout` bounds each attempt and is clamped to the allowed range.
    pub async fn invoke(
        &self,
        original: Bytes,
        content_type: &str,
        mode: EnhancementMode,
        timeout: Duration,
    ) -> Result<EnhancedImage, InvokeError> {
        let timeout = timeout::clamp(timeout);
        let mut last_reason = String::new();

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(original.clone(), content_type, mode, timeout).await {
                Ok(image) => {
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        size_bytes = image.bytes.len(),
                        "Enhancement attempt succeeded"
                    );
                    return Ok(image);
                }
                Err(AttemptError::Permanent(reason)) => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        reason = %reason,
                        "Enhancement failed permanently"
                    );
                    return Err(InvokeError::permanent(reason));
                }
                Err(AttemptError::Transient(reason)) => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        reason = %reason,
                        "Enhancement attempt failed transiently"
                    );
                    last_reason = reason;

                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(InvokeError::Permanent {
            reason: format!(
                "gave up after {} attempts: {}",
                self.policy.max_attempts, last_reason
            ),
            exhausted: true,
        })
    }

    async fn attempt(
        &self,
        original: Bytes,
        content_type: &str,
        mode: EnhancementMode,
        timeout: Duration,
    ) -> Result<EnhancedImage, AttemptError> {
        let call = self.provider.enhance(original, content_type, mode);

        let response = match tokio::time::timeout(timeout, call).await {
            Err(_) => return Err(AttemptError::Transient(ProviderError::Timeout.to_string())),
            Ok(Err(e)) if e.is_transient() => return Err(AttemptError::Transient(e.to_string())),
            Ok(Err(e)) => return Err(AttemptError::Permanent(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let format = check_image(&response.bytes, &response.content_type).map_err(|e| {
            AttemptError::Permanent(format!("provider returned an unusable image: {}", e))
        })?;

        Ok(EnhancedImage {
            bytes: response.bytes,
            format,
        })
    }
}
