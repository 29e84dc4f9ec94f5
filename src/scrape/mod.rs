//! Per-request scrape orchestration
//!
//! A run launches an isolated browser session, waits for the page `load` event under
//! a [`LoadTimeoutGuard`], polls for the requested selector with a [`ReadinessPoller`]
//! and always tears the session down before handing back a [`ScrapeResult`].
//!
//! # Example
//!
//! ```no_run
//! use scrape_api::{ChromeEngine, Config, ScrapeOrchestrator, ScrapeRequest};
//!
//! # async fn example() {
//! let config = Config::default();
//! let engine = ChromeEngine::new(config.browser.clone());
//! let orchestrator = ScrapeOrchestrator::from_config(engine, &config.scrape);
//! let request = ScrapeRequest::new("http://example.com/").with_selector("h1");
//! match orchestrator.orchestrate(&request).await {
//!     Ok(html) => println!("{html}"),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! # }
//! ```

mod guard;
mod orchestrator;
mod poller;

pub use guard::{ArmedGuard, LoadTimeoutGuard};
pub use orchestrator::ScrapeOrchestrator;
pub use poller::{PollState, ReadinessPoller};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Informational per-request event, suppressed when the request carries no session id.
macro_rules! session_event {
    ($level:ident, $session:expr, $($arg:tt)+) => {{
        let session: &str = $session;
        if !session.is_empty() {
            tracing::$level!(session = %session, $($arg)+);
        }
    }};
}
pub(crate) use session_event;

/// One scrape, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    /// Readiness condition; `None` resolves as soon as the page has loaded
    #[serde(default)]
    pub selector: Option<String>,
    /// Return the whole document instead of the matched elements
    #[serde(default)]
    pub return_full_page: bool,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Correlation id for logs; empty keeps the run quiet
    #[serde(default)]
    pub session_id: String,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: None,
            return_full_page: false,
            proxy: None,
            session_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into()).filter(|s: &String| !s.is_empty());
        self
    }

    #[must_use]
    pub fn with_full_page(mut self, return_full_page: bool) -> Self {
        self.return_full_page = return_full_page;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into()).filter(|p: &String| !p.is_empty());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Non-empty selector, if any
    pub fn readiness_selector(&self) -> Option<&str> {
        self.selector.as_deref().filter(|s| !s.is_empty())
    }

    /// The URL must be absolute with an http(s) scheme.
    pub fn validate(&self) -> Result<(), ScrapeFailure> {
        if self.url.trim().is_empty() {
            return Err(ScrapeFailure::new(FailureKind::InvalidRequest, "url is required"));
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| {
            ScrapeFailure::new(
                FailureKind::InvalidRequest,
                format!("invalid url '{}': {}", self.url, e),
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScrapeFailure::new(
                FailureKind::InvalidRequest,
                format!("url must start with http:// or https://, got '{}'", self.url),
            ));
        }
        Ok(())
    }
}

/// Fresh short correlation id: the first group of a v4 uuid.
pub fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Terminal failure classes of a scrape run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Request rejected before any browser work
    InvalidRequest,
    /// Engine failed to start or open a page
    EngineLaunch,
    /// The load event never fired within the guard window
    PageLoadTimeout,
    /// The selector never matched within the polling budget
    ElementTimeout,
    /// The engine raised while polling or extracting
    EngineError,
    /// The caller abandoned the request
    Cancelled,
}

impl FailureKind {
    /// Transport status the HTTP layer answers with.
    pub fn status_code(self) -> u16 {
        match self {
            FailureKind::InvalidRequest => 400,
            FailureKind::ElementTimeout => 404,
            FailureKind::Cancelled => 499,
            FailureKind::EngineLaunch | FailureKind::EngineError => 500,
            FailureKind::PageLoadTimeout => 503,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ScrapeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ScrapeFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn engine(detail: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::EngineError, format!("browser engine error: {detail}"))
    }

    pub fn launch(detail: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::EngineLaunch, format!("browser launch error: {detail}"))
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "request cancelled")
    }
}

/// Markup on success, a classified failure otherwise.
pub type ScrapeResult = Result<String, ScrapeFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_from_camel_case() {
        let request: ScrapeRequest = serde_json::from_str(
            r#"{"url":"http://example.com/","selector":"h1","returnFullPage":true}"#,
        )
        .unwrap();
        assert_eq!(request.url, "http://example.com/");
        assert_eq!(request.readiness_selector(), Some("h1"));
        assert!(request.return_full_page);
        assert!(request.proxy.is_none());
        assert!(request.session_id.is_empty());
    }

    #[test]
    fn empty_selector_means_no_readiness_condition() {
        let request = ScrapeRequest {
            selector: Some(String::new()),
            ..ScrapeRequest::new("http://example.com/")
        };
        assert_eq!(request.readiness_selector(), None);
        assert_eq!(
            ScrapeRequest::new("http://example.com/").with_selector("").selector,
            None
        );
    }

    #[test]
    fn validate_rejects_relative_and_non_http_urls() {
        assert!(ScrapeRequest::new("http://example.com/").validate().is_ok());
        for bad in ["", "   ", "/relative/path", "example.com", "ftp://example.com/"] {
            let err = ScrapeRequest::new(bad).validate().unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidRequest, "accepted {bad:?}");
        }
    }

    #[test]
    fn status_codes_follow_failure_class() {
        assert_eq!(FailureKind::InvalidRequest.status_code(), 400);
        assert_eq!(FailureKind::ElementTimeout.status_code(), 404);
        assert_eq!(FailureKind::EngineLaunch.status_code(), 500);
        assert_eq!(FailureKind::EngineError.status_code(), 500);
        assert_eq!(FailureKind::PageLoadTimeout.status_code(), 503);
    }

    #[test]
    fn session_ids_are_short_and_fresh() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
