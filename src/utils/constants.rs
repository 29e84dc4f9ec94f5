//! Shared configuration constants for the scrape service
//!
//! Defaults for timers and budgets live here so config, CLI and tests agree on them.

use std::time::Duration;

/// Chrome user agent string used unless `USER_AGENT` or config overrides it
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// How long navigation may take before the load event must have fired
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 30_000;

/// Delay between two readiness checks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Readiness checks before giving up on the selector (~60s at the default interval)
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

/// CDP request timeout handed to chromiumoxide
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for each teardown step (page close, browser close, process exit)
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Salt used when none is configured; the server warns loudly about it
pub const DEFAULT_SALT: &str = "NO-SALT";

pub const DEFAULT_PORT: u16 = 8000;
