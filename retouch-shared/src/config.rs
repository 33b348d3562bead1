/// Core policy configuration
///
/// Limits and policies shared by the API server and the worker. Loaded from
/// environment variables; every value has a default.
///
/// # Environment Variables
///
/// - `RETOUCH_FREE_TIER_LIMIT`: Free enhancements per user (default: 2)
/// - `RETOUCH_MAX_UPLOAD_BYTES`: Largest accepted upload (default: 10 MiB)
/// - `RETOUCH_STORAGE_LIMIT_BYTES`: Storage quota for new users (default: 500 MiB)
/// - `RETOUCH_PHOTO_TTL_HOURS`: Photo lifetime before the expiry sweep (default: 168)
/// - `RETOUCH_CLAWBACK`: Refunded purchase handling, `never` or `capped` (default: never)
///
/// # Example
///
/// ```no_run
/// use retouch_shared::config::CoreConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = CoreConfig::from_env()?;
/// println!("Free tier: {} enhancements", config.free_tier_limit);
/// # Ok(())
/// # }
/// ```

use crate::payments::ClawbackPolicy;
use crate::quota::FREE_TIER_LIMIT;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Default largest upload (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: i64 = 10 * 1024 * 1024;

/// Default per-user storage quota (500 MiB)
pub const DEFAULT_STORAGE_LIMIT_BYTES: i64 = 500 * 1024 * 1024;

/// Default photo lifetime (7 days)
pub const DEFAULT_PHOTO_TTL_HOURS: i64 = 168;

/// Core limits and policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Free enhancements per user
    pub free_tier_limit: i32,

    /// Largest accepted upload in bytes
    pub max_upload_bytes: i64,

    /// Storage quota assigned to new users
    pub default_storage_limit_bytes: i64,

    /// Photo lifetime in hours
    pub photo_ttl_hours: i64,

    /// What a refunded purchase does to the balance
    pub clawback: ClawbackPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            free_tier_limit: FREE_TIER_LIMIT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_storage_limit_bytes: DEFAULT_STORAGE_LIMIT_BYTES,
            photo_ttl_hours: DEFAULT_PHOTO_TTL_HOURS,
            clawback: ClawbackPolicy::Never,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable or
    /// out-of-range value.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let free_tier_limit =
            parse_or(&lookup, "RETOUCH_FREE_TIER_LIMIT", defaults.free_tier_limit)?;
        let max_upload_bytes =
            parse_or(&lookup, "RETOUCH_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?;
        let default_storage_limit_bytes = parse_or(
            &lookup,
            "RETOUCH_STORAGE_LIMIT_BYTES",
            defaults.default_storage_limit_bytes,
        )?;
        let photo_ttl_hours =
            parse_or(&lookup, "RETOUCH_PHOTO_TTL_HOURS", defaults.photo_ttl_hours)?;
        let clawback = parse_or(&lookup, "RETOUCH_CLAWBACK", defaults.clawback)?;

        if free_tier_limit < 0 {
            anyhow::bail!("RETOUCH_FREE_TIER_LIMIT must not be negative");
        }
        if max_upload_bytes <= 0 {
            anyhow::bail!("RETOUCH_MAX_UPLOAD_BYTES must be positive");
        }
        if default_storage_limit_bytes <= 0 {
            anyhow::bail!("RETOUCH_STORAGE_LIMIT_BYTES must be positive");
        }
        if photo_ttl_hours <= 0 {
            anyhow::bail!("RETOUCH_PHOTO_TTL_HOURS must be positive");
        }

        Ok(Self {
            free_tier_limit,
            max_upload_bytes,
            default_storage_limit_bytes,
            photo_ttl_hours,
            clawback,
        })
    }

    /// Photo lifetime
    pub fn photo_ttl(&self) -> Duration {
        Duration::hours(self.photo_ttl_hours)
    }
}

/// Parses `key` if present, otherwise returns `default`
pub fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.free_tier_limit, 2);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.photo_ttl(), Duration::days(7));
        assert_eq!(config.clawback, ClawbackPolicy::Never);
    }

    #[test]
    fn test_overrides() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("RETOUCH_FREE_TIER_LIMIT", "5"),
            ("RETOUCH_PHOTO_TTL_HOURS", "24"),
            ("RETOUCH_CLAWBACK", "capped"),
        ]))
        .unwrap();
        assert_eq!(config.free_tier_limit, 5);
        assert_eq!(config.photo_ttl(), Duration::hours(24));
        assert_eq!(config.clawback, ClawbackPolicy::Capped);
    }

    #[test]
    fn test_invalid_values() {
        assert!(CoreConfig::from_lookup(lookup(&[("RETOUCH_FREE_TIER_LIMIT", "two")])).is_err());
        assert!(CoreConfig::from_lookup(lookup(&[("RETOUCH_MAX_UPLOAD_BYTES", "0")])).is_err());
        assert!(CoreConfig::from_lookup(lookup(&[("RETOUCH_CLAWBACK", "always")])).is_err());
    }
}
