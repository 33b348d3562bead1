/// Scripted provider for tests and local development
///
/// Each call pops the next scripted step. When the script runs out the
/// provider echoes the original image back, so an unscripted mock behaves
/// like an identity enhancement.

use super::{EnhancementProvider, ProviderError, ProviderResponse};
use async_trait::async_trait;
use bytes::Bytes;
use retouch_shared::models::photo::EnhancementMode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted provider call
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return the original image unchanged
    Echo,

    /// Return these bytes
    Respond(ProviderResponse),

    /// Fail with this error
    Fail(ProviderError),

    /// Sleep before echoing, for timeout tests
    Delay(Duration),
}

/// Provider that replays a script
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockStep>>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Always echoes
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn scripted(steps: impl IntoIterator<Item = MockStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `enhance` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> MockStep {
        self.script
            .lock()
            .map(|mut script| script.pop_front())
            .ok()
            .flatten()
            .unwrap_or(MockStep::Echo)
    }
}

#[async_trait]
impl EnhancementProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn enhance(
        &self,
        original: Bytes,
        content_type: &str,
        _mode: EnhancementMode,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let echo = ProviderResponse {
            bytes: original,
            content_type: content_type.to_string(),
        };

        match self.next_step() {
            MockStep::Echo => Ok(echo),
            MockStep::Respond(response) => Ok(response),
            MockStep::Fail(error) => Err(error),
            MockStep::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(echo)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let provider = MockProvider::scripted([MockStep::Fail(ProviderError::Timeout)]);
        let original = Bytes::from_static(b"image");

        let first = provider
            .enhance(original.clone(), "image/png", EnhancementMode::Restore)
            .await;
        assert_eq!(first, Err(ProviderError::Timeout));

        let second = provider
            .enhance(original.clone(), "image/png", EnhancementMode::Restore)
            .await
            .unwrap();
        assert_eq!(second.bytes, original);
        assert_eq!(second.content_type, "image/png");
        assert_eq!(provider.calls(), 2);
    }
}
