//! Timer validation for scrape settings

use std::time::Duration;

use anyhow::{Result, bail};

/// Maximum page-load window (5 minutes)
pub const MAX_LOAD_TIMEOUT_MS: u64 = 300_000;

/// Poll interval bounds; below the minimum every tick is a CDP round-trip storm
pub const MIN_POLL_INTERVAL_MS: u64 = 50;
pub const MAX_POLL_INTERVAL_MS: u64 = 30_000;

/// Validate the page-load window
///
/// # Example
/// ```rust,ignore
/// let window = validate_load_timeout(45_000)?;
/// ```
pub fn validate_load_timeout(ms: u64) -> Result<Duration> {
    if ms == 0 {
        bail!("Load timeout must be greater than 0ms");
    }
    if ms > MAX_LOAD_TIMEOUT_MS {
        bail!(
            "Load timeout cannot exceed {}ms ({} minutes). Received: {}ms ({:.1} minutes)",
            MAX_LOAD_TIMEOUT_MS,
            MAX_LOAD_TIMEOUT_MS / 60_000,
            ms,
            ms as f64 / 60_000.0
        );
    }
    Ok(Duration::from_millis(ms))
}

pub fn validate_poll_interval(ms: u64) -> Result<Duration> {
    if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&ms) {
        bail!(
            "Poll interval must be between {}ms and {}ms. Received: {}ms",
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
            ms
        );
    }
    Ok(Duration::from_millis(ms))
}
