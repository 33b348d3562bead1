/// Worker configuration
///
/// # Environment Variables
///
/// - `RETOUCH_PROVIDER_URL`: Enhancement service base URL (absent: mock provider)
/// - `RETOUCH_PROVIDER_API_KEY`: Bearer token for the enhancement service
/// - `RETOUCH_PROVIDER_TIMEOUT_SECS`: Per-attempt timeout, clamped to 1s..10min (default: 60)
/// - `RETOUCH_WORKER_CONCURRENCY`: Concurrent provider calls (default: 8)
/// - `RETOUCH_SWEEP_INTERVAL_SECS`: Maintenance sweep period (default: 60)
/// - `RETOUCH_STUCK_AFTER_SECS`: Processing age treated as stuck (default: 900);
///   must exceed the invoker's worst case of every attempt timing out plus backoff

use crate::invoker::RetryPolicy;
use crate::provider::{EnhancementProvider, HttpProvider, MockProvider};
use crate::timeout;
use retouch_shared::config::parse_or;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default concurrent provider calls
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default maintenance sweep period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default age after which a processing photo is considered stuck
pub const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(900);

/// Worker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub provider_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_timeout: Duration,
    pub concurrency: usize,
    pub sweep_interval: Duration,
    pub stuck_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            provider_api_key: None,
            provider_timeout: timeout::DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stuck_after: DEFAULT_STUCK_AFTER,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout_secs: Option<i64> = match non_empty("RETOUCH_PROVIDER_TIMEOUT_SECS") {
            Some(raw) => Some(raw.trim().parse().map_err(|e| {
                anyhow::anyhow!("invalid value for RETOUCH_PROVIDER_TIMEOUT_SECS: {}", e)
            })?),
            None => None,
        };

        let concurrency = parse_or(&lookup, "RETOUCH_WORKER_CONCURRENCY", defaults.concurrency)?;
        let sweep_interval = parse_or(
            &lookup,
            "RETOUCH_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;
        let stuck_after = parse_or(
            &lookup,
            "RETOUCH_STUCK_AFTER_SECS",
            defaults.stuck_after.as_secs(),
        )?;

        if concurrency == 0 {
            anyhow::bail!("RETOUCH_WORKER_CONCURRENCY must be at least 1");
        }
        if sweep_interval == 0 {
            anyhow::bail!("RETOUCH_SWEEP_INTERVAL_SECS must be positive");
        }
        if stuck_after == 0 {
            anyhow::bail!("RETOUCH_STUCK_AFTER_SECS must be positive");
        }

        let provider_timeout = timeout::provider_timeout(timeout_secs);

        // A live enhancement must never look stuck to the sweeper
        let longest_invoke = RetryPolicy::default().worst_case(provider_timeout);
        if Duration::from_secs(stuck_after) <= longest_invoke {
            anyhow::bail!(
                "RETOUCH_STUCK_AFTER_SECS ({}) must exceed the longest enhancement ({}s with retries)",
                stuck_after,
                longest_invoke.as_secs()
            );
        }

        Ok(Self {
            provider_url: non_empty("RETOUCH_PROVIDER_URL"),
            provider_api_key: non_empty("RETOUCH_PROVIDER_API_KEY"),
            provider_timeout,
            concurrency,
            sweep_interval: Duration::from_secs(sweep_interval),
            stuck_after: Duration::from_secs(stuck_after),
        })
    }

    /// HTTP provider when a URL is configured, otherwise the echoing mock
    pub fn build_provider(&self) -> Arc<dyn EnhancementProvider> {
        match &self.provider_url {
            Some(url) => Arc::new(HttpProvider::new(url.clone(), self.provider_api_key.clone())),
            None => {
                warn!("RETOUCH_PROVIDER_URL not set, using mock enhancement provider");
                Arc::new(MockProvider::echo())
            }
        }
    }
}
