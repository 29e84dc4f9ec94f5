//! Browser infrastructure for launching isolated Chrome sessions
//!
//! The orchestration core talks to the engine only through [`BrowserEngine`] and
//! [`PageSession`]. The chromiumoxide implementation lives in [`wrapper`]; tests drive
//! the same traits with a scripted in-memory engine.

mod wrapper;

pub use crate::browser_setup::{download_managed_browser, find_browser_executable};
pub use wrapper::{ChromeEngine, ChromeSession};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to find browser executable: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Page is closed")]
    PageClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    IoError(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Receives the page's first `load` event.
///
/// Resolves `Err` when the page goes away without ever firing it, which callers treat
/// as "the load event will never arrive".
pub type LoadSignal = oneshot::Receiver<()>;

/// Per-session launch settings
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Route all page traffic through this proxy URI (`--proxy-server=`)
    pub proxy: Option<String>,
}

impl LaunchOptions {
    pub fn with_proxy(proxy: Option<&str>) -> Self {
        Self {
            proxy: proxy.filter(|p| !p.is_empty()).map(str::to_owned),
        }
    }
}

/// Launches one isolated engine process per call.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    type Session: PageSession;

    /// Start a fresh engine process. No page is open yet.
    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<Self::Session>;
}

/// One engine process plus at most one page.
///
/// `close` must be safe to call at any point after `launch` returned, any number of
/// times, and never fails.
#[async_trait]
pub trait PageSession: Send + Sync {
    type Element: Send + Sync;

    /// Open the single page this session drives.
    async fn open_page(&mut self) -> BrowserResult<()>;

    /// One-shot subscription to the page `load` event.
    async fn subscribe_load(&mut self) -> BrowserResult<LoadSignal>;

    /// Begin loading `url`. Returns once the navigation is dispatched, not loaded.
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// Snapshot of the elements currently matching `selector`.
    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<Self::Element>>;

    async fn outer_markup(&self, element: &Self::Element) -> BrowserResult<String>;

    async fn full_document_markup(&self) -> BrowserResult<String>;

    /// Release the page, then the engine process. Failures are logged, never returned.
    async fn close(&mut self);
}

/// Tracks whether a session has started releasing its resources.
///
/// Only the first [`CloseLatch::begin`] returns `true`; every later call, and every
/// use-after-close check, sees the session as closed.
#[derive(Debug, Default)]
pub(crate) struct CloseLatch {
    closed: bool,
}

impl CloseLatch {
    /// Mark the session closed. `true` only for the call that should release.
    pub(crate) fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedPage};

    #[test]
    fn latch_releases_once() {
        let mut latch = CloseLatch::default();
        assert!(!latch.is_closed());
        assert!(latch.begin());
        assert!(latch.is_closed());
        assert!(!latch.begin());
        assert!(!latch.begin());
        assert!(latch.is_closed());
    }

    #[test]
    fn empty_proxy_is_no_proxy() {
        assert_eq!(LaunchOptions::with_proxy(Some("")).proxy, None);
        assert_eq!(
            LaunchOptions::with_proxy(Some("http://10.0.0.1:3128")).proxy.as_deref(),
            Some("http://10.0.0.1:3128")
        );
    }

    #[tokio::test]
    async fn never_opened_session_closes_once() {
        let engine = ScriptedEngine::new(ScriptedPage::default());
        let mut session = engine.launch(&LaunchOptions::default()).await.unwrap();

        session.close().await;
        session.close().await;

        let stats = engine.stats();
        assert_eq!(stats.close_calls, 2);
        assert_eq!(stats.closes, 1);
        assert!(matches!(session.open_page().await, Err(BrowserError::PageClosed)));
    }

    #[tokio::test]
    async fn closed_session_rejects_further_use() {
        let engine = ScriptedEngine::new(ScriptedPage::default());
        let mut session = engine.launch(&LaunchOptions::default()).await.unwrap();
        session.open_page().await.unwrap();
        assert!(session.full_document_markup().await.is_ok());

        session.close().await;
        session.close().await;

        assert_eq!(engine.stats().closes, 1);
        assert!(matches!(
            session.navigate("http://example.com/").await,
            Err(BrowserError::PageClosed)
        ));
        assert!(matches!(
            session.query_all("h1").await,
            Err(BrowserError::PageClosed)
        ));
    }
}
