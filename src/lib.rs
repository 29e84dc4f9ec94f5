//! Headless Chrome scrape service
//!
//! Renders a page in an isolated Chrome session and returns either the whole document
//! or the markup of the elements matching a CSS selector once they appear.

mod browser;
pub mod browser_setup;
mod manager;
pub mod scrape;
pub mod server;
mod utils;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::utils::constants::{
    DEFAULT_LOAD_TIMEOUT_MS, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SALT,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// HTTP listener and request signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret for `md5("{url}:{salt}")` request signatures
    #[serde(default = "default_salt")]
    pub salt: String,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, certificate checks)
    /// WARNING: Only enable for trusted content
    #[serde(default)]
    pub disable_security: bool,

    /// Pass `--no-sandbox`; required when running as root in a container
    #[serde(default = "default_no_sandbox")]
    pub no_sandbox: bool,

    /// Explicit Chrome/Chromium binary; searched for when absent
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// User agent override, `USER_AGENT` in the environment
    #[serde(default)]
    pub user_agent: Option<String>,

    /// CDP command timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

/// Timers and budgets of a scrape run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Upper bound on concurrently running Chrome processes; unbounded when absent
    #[serde(default)]
    pub max_concurrent_sessions: Option<usize>,

    /// Stop browser work when the HTTP caller disconnects
    #[serde(default)]
    pub cancel_on_disconnect: bool,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_salt() -> String {
    DEFAULT_SALT.to_string()
}

fn default_headless() -> bool {
    true
}

fn default_no_sandbox() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_load_timeout_ms() -> u64 {
    DEFAULT_LOAD_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            salt: default_salt(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: false,
            no_sandbox: default_no_sandbox(),
            executable: None,
            user_agent: None,
            request_timeout_ms: default_request_timeout_ms(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: default_load_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            max_concurrent_sessions: None,
            cancel_on_disconnect: false,
        }
    }
}

impl Config {
    /// Apply `SALT`, `USER_AGENT` and `PORT` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(salt) = lookup("SALT").filter(|s| !s.is_empty()) {
            self.server.salt = salt;
        }
        if let Some(user_agent) = lookup("USER_AGENT").filter(|s| !s.is_empty()) {
            self.browser.user_agent = Some(user_agent);
        }
        if let Some(port) = lookup("PORT").filter(|s| !s.is_empty()) {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{port}'"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        utils::validate_load_timeout(self.scrape.load_timeout_ms)?;
        utils::validate_poll_interval(self.scrape.poll_interval_ms)?;
        if self.scrape.max_poll_attempts == 0 {
            anyhow::bail!("max_poll_attempts must be at least 1");
        }
        if self.scrape.max_concurrent_sessions == Some(0) {
            anyhow::bail!("max_concurrent_sessions must be at least 1 when set");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.bind, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    self.server.bind, self.server.port
                )
            })
    }

    pub fn uses_default_salt(&self) -> bool {
        self.server.salt == DEFAULT_SALT
    }
}

/// Load config from `path`, or `./config.yaml` when present, then apply environment
/// overrides and validate.
pub fn load_yaml_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_yaml(path)?,
        None => {
            let fallback = PathBuf::from("config.yaml");
            if fallback.exists() {
                read_yaml(&fallback)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_yaml(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub use browser::{
    BrowserEngine, BrowserError, BrowserResult, ChromeEngine, ChromeSession, LaunchOptions,
    LoadSignal, PageSession, download_managed_browser, find_browser_executable,
};
pub use manager::ScrapeManager;
pub use scrape::{
    FailureKind, LoadTimeoutGuard, PollState, ReadinessPoller, ScrapeFailure, ScrapeOrchestrator,
    ScrapeRequest, ScrapeResult, new_session_id,
};
