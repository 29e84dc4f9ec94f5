//! chromiumoxide implementation of the session traits

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::element::Element;
use chromiumoxide_cdp::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OnceCell, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BrowserEngine, BrowserError, BrowserResult, CloseLatch, LaunchOptions, LoadSignal,
    PageSession,
};
use crate::BrowserConfig;
use crate::browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
use crate::utils::constants::CLOSE_TIMEOUT;

/// Launches a dedicated Chrome process per scrape.
///
/// The executable is looked up (or downloaded) once per engine and shared by clones;
/// concurrent first launches wait for the same lookup.
#[derive(Debug, Clone)]
pub struct ChromeEngine {
    settings: BrowserConfig,
    executable: Arc<OnceCell<PathBuf>>,
}

impl ChromeEngine {
    pub fn new(settings: BrowserConfig) -> Self {
        Self {
            settings,
            executable: Arc::new(OnceCell::new()),
        }
    }

    /// Chrome binary used by every launch of this engine.
    pub async fn executable(&self) -> BrowserResult<PathBuf> {
        self.executable
            .get_or_try_init(|| async {
                match find_browser_executable(self.settings.executable.as_deref()).await {
                    Ok(path) => Ok(path),
                    Err(_) => download_managed_browser().await,
                }
            })
            .await
            .cloned()
            .map_err(|e| BrowserError::NotFound(format!("{e:#}")))
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    type Session = ChromeSession;

    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<ChromeSession> {
        let chrome_path = self.executable().await?;

        // Unique profile per session, concurrent Chromes must not share a profile lock
        let user_data_dir = std::env::temp_dir().join(format!(
            "scrape_api_{}_{}",
            std::process::id(),
            Uuid::new_v4().simple()
        ));

        let (browser, handler, user_data_dir) = launch_browser(
            &self.settings,
            chrome_path,
            options.proxy.as_deref(),
            user_data_dir,
        )
        .await
        .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;

        Ok(ChromeSession::new(browser, handler, user_data_dir))
    }
}

/// One Chrome process, its CDP handler task, its profile directory and its page.
///
/// The handler MUST be aborted and the profile removed after the process exits;
/// [`PageSession::close`] does both. Dropping an unclosed session only aborts the
/// handler (chromiumoxide kills the child process on drop) and leaves the profile behind.
pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    load_task: Option<JoinHandle<()>>,
    user_data_dir: Option<PathBuf>,
    latch: CloseLatch,
}

impl ChromeSession {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: PathBuf) -> Self {
        Self {
            browser,
            handler,
            page: None,
            load_task: None,
            user_data_dir: Some(user_data_dir),
            latch: CloseLatch::default(),
        }
    }

    fn page(&self) -> BrowserResult<&Page> {
        if self.latch.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        self.page.as_ref().ok_or(BrowserError::PageClosed)
    }

    /// Must run after `browser.wait()`, Chrome holds the profile files until it exits.
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            debug!("Cleaning up temp directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up temp directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    type Element = Element;

    async fn open_page(&mut self) -> BrowserResult<()> {
        if self.latch.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
        self.page = Some(page);
        Ok(())
    }

    async fn subscribe_load(&mut self) -> BrowserResult<LoadSignal> {
        let mut events = self
            .page()?
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            // Only the first load counts; dropping `tx` otherwise tells the waiter it never came
            if events.next().await.is_some() {
                let _ = tx.send(());
            }
        });
        if let Some(previous) = self.load_task.replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let response = self
            .page()?
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        match &response.result.error_text {
            Some(error_text) => Err(BrowserError::NavigationFailed(error_text.clone())),
            None => Ok(()),
        }
    }

    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<Element>> {
        self.page()?
            .find_elements(selector)
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn outer_markup(&self, element: &Element) -> BrowserResult<String> {
        if self.latch.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        element
            .outer_html()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn full_document_markup(&self) -> BrowserResult<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn close(&mut self) {
        if !self.latch.begin() {
            return;
        }

        if let Some(task) = self.load_task.take() {
            task.abort();
        }

        if let Some(page) = self.page.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to close page cleanly: {}", e),
                Err(_) => warn!("Timed out closing page after {:?}", CLOSE_TIMEOUT),
            }
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.browser.close()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to close browser cleanly: {}", e),
            Err(_) => warn!("Timed out closing browser after {:?}", CLOSE_TIMEOUT),
        }

        // Reap the process before touching its profile directory
        match tokio::time::timeout(CLOSE_TIMEOUT, self.browser.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to wait for browser exit: {}", e),
            Err(_) => {
                warn!("Browser did not exit within {:?}, killing it", CLOSE_TIMEOUT);
                if let Some(Err(e)) = self.browser.kill().await {
                    warn!("Failed to kill browser process: {}", e);
                }
            }
        }

        self.handler.abort();
        self.cleanup_temp_dir();
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(path) = &self.user_data_dir {
            warn!(
                "ChromeSession dropped without close(); profile directory orphaned: {}",
                path.display()
            );
        }
    }
}
