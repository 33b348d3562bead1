/// Provider call timeouts
///
/// Every provider attempt runs under a hard `tokio::time::timeout`. The
/// configured value is clamped into a sane range so a typo in the
/// environment cannot disable the bound or hang a worker slot for hours.
///
/// # Bounds
///
/// - No timeout configured: 60 seconds
/// - Minimum: 1 second
/// - Maximum: 10 minutes

use std::time::Duration;

/// Default provider timeout (60 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum allowed timeout (1 second)
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum allowed timeout (10 minutes)
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Clamps a configured timeout in seconds
///
/// Non-positive values become `MIN_TIMEOUT`.
pub fn provider_timeout(seconds: Option<i64>) -> Duration {
    match seconds {
        None => DEFAULT_TIMEOUT,
        Some(secs) if secs <= 0 => MIN_TIMEOUT,
        Some(secs) => clamp(Duration::from_secs(secs as u64)),
    }
}

/// Clamps a duration into `[MIN_TIMEOUT, MAX_TIMEOUT]`
pub fn clamp(timeout: Duration) -> Duration {
    timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}
