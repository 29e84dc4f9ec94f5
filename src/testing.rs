//! Scripted in-memory engine for exercising the scrape core without Chrome

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::browser::{
    BrowserEngine, BrowserError, BrowserResult, CloseLatch, LaunchOptions, LoadSignal,
    PageSession,
};

pub const DOCUMENT: &str =
    "<html><head><title>Example Domain</title></head><body><h1>Example Domain</h1></body></html>";

/// What the fake page does, decided up front.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub document: String,
    selector: Option<String>,
    matches: Vec<String>,
    appear_on_query: u32,
    fail_query_on: Option<u32>,
    fail_extraction_on: Option<u32>,
    /// `None`: the load event never fires
    load_after: Option<Duration>,
    navigate_error: bool,
    fail_launch: bool,
    panic_on_launch: bool,
    fail_open_page: bool,
    panic_on_document: bool,
}

impl Default for ScriptedPage {
    fn default() -> Self {
        Self {
            document: DOCUMENT.to_string(),
            selector: None,
            matches: Vec::new(),
            appear_on_query: 1,
            fail_query_on: None,
            fail_extraction_on: None,
            load_after: Some(Duration::ZERO),
            navigate_error: false,
            fail_launch: false,
            panic_on_launch: false,
            fail_open_page: false,
            panic_on_document: false,
        }
    }
}

impl ScriptedPage {
    pub fn with_matches(mut self, selector: &str, matches: &[&str]) -> Self {
        self.selector = Some(selector.to_string());
        self.matches = matches.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Elements show up starting with the n-th query (1-based)
    pub fn appearing_on_query(mut self, n: u32) -> Self {
        self.appear_on_query = n;
        self
    }

    pub fn failing_query_on(mut self, n: u32) -> Self {
        self.fail_query_on = Some(n);
        self
    }

    pub fn failing_extraction_on(mut self, n: u32) -> Self {
        self.fail_extraction_on = Some(n);
        self
    }

    pub fn loading_after(mut self, delay: Duration) -> Self {
        self.load_after = Some(delay);
        self
    }

    pub fn never_loading(mut self) -> Self {
        self.load_after = None;
        self
    }

    pub fn with_navigate_error(mut self) -> Self {
        self.navigate_error = true;
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn panicking_on_launch(mut self) -> Self {
        self.panic_on_launch = true;
        self
    }

    pub fn failing_open_page(mut self) -> Self {
        self.fail_open_page = true;
        self
    }

    pub fn panicking_on_document(mut self) -> Self {
        self.panic_on_document = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub launches: u32,
    pub proxies: Vec<Option<String>>,
    pub pages_opened: u32,
    pub navigations: u32,
    pub queries: u32,
    pub extractions: u32,
    pub max_concurrent_extractions: u32,
    in_flight_extractions: u32,
    /// Every `close()` call, including repeated ones
    pub close_calls: u32,
    /// Closes that actually released a session
    pub closes: u32,
    live_sessions: u32,
    pub max_live_sessions: u32,
}

/// Every session launched by one engine shares its stats.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    page: ScriptedPage,
    stats: Arc<Mutex<Stats>>,
}

impl ScriptedEngine {
    pub fn new(page: ScriptedPage) -> Self {
        Self {
            page,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }

    /// A session whose page already exists and has been navigated.
    pub async fn open_loaded(&self) -> ScriptedSession {
        let mut session = ScriptedSession::new(self.page.clone(), self.stats.clone());
        session.page_open = true;
        session
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    type Session = ScriptedSession;

    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<ScriptedSession> {
        {
            let mut stats = lock(&self.stats);
            stats.launches += 1;
            stats.proxies.push(options.proxy.clone());
            if self.page.panic_on_launch {
                panic!("engine process aborted during startup");
            }
            if self.page.fail_launch {
                return Err(BrowserError::LaunchFailed("chrome exited with status 1".into()));
            }
            stats.live_sessions += 1;
            stats.max_live_sessions = stats.max_live_sessions.max(stats.live_sessions);
        }
        Ok(ScriptedSession::new(self.page.clone(), self.stats.clone()))
    }
}

pub struct ScriptedSession {
    page: ScriptedPage,
    stats: Arc<Mutex<Stats>>,
    page_open: bool,
    load_tx: Mutex<Option<oneshot::Sender<()>>>,
    latch: CloseLatch,
}

impl ScriptedSession {
    fn new(page: ScriptedPage, stats: Arc<Mutex<Stats>>) -> Self {
        Self {
            page,
            stats,
            page_open: false,
            load_tx: Mutex::new(None),
            latch: CloseLatch::default(),
        }
    }

    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }

    fn ensure_open(&self) -> BrowserResult<()> {
        if self.latch.is_closed() || !self.page_open {
            return Err(BrowserError::PageClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    type Element = usize;

    async fn open_page(&mut self) -> BrowserResult<()> {
        if self.latch.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        lock(&self.stats).pages_opened += 1;
        if self.page.fail_open_page {
            return Err(BrowserError::PageCreationFailed("target crashed".into()));
        }
        self.page_open = true;
        Ok(())
    }

    async fn subscribe_load(&mut self) -> BrowserResult<LoadSignal> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        *lock(&self.load_tx) = Some(tx);
        Ok(rx)
    }

    async fn navigate(&self, _url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        lock(&self.stats).navigations += 1;

        if let Some(delay) = self.page.load_after {
            if let Some(tx) = lock(&self.load_tx).take() {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(());
                });
            }
        }

        if self.page.navigate_error {
            return Err(BrowserError::NavigationFailed("net::ERR_CONNECTION_RESET".into()));
        }
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<usize>> {
        self.ensure_open()?;
        let n = {
            let mut stats = lock(&self.stats);
            stats.queries += 1;
            stats.queries
        };
        if self.page.fail_query_on == Some(n) {
            return Err(BrowserError::PageClosed);
        }
        if self.page.selector.as_deref() == Some(selector) && n >= self.page.appear_on_query {
            return Ok((0..self.page.matches.len()).collect());
        }
        Ok(Vec::new())
    }

    async fn outer_markup(&self, element: &usize) -> BrowserResult<String> {
        self.ensure_open()?;
        let n = {
            let mut stats = lock(&self.stats);
            stats.extractions += 1;
            stats.in_flight_extractions += 1;
            stats.max_concurrent_extractions = stats
                .max_concurrent_extractions
                .max(stats.in_flight_extractions);
            stats.extractions
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        lock(&self.stats).in_flight_extractions -= 1;

        if self.page.fail_extraction_on == Some(n) {
            return Err(BrowserError::PageClosed);
        }
        self.page
            .matches
            .get(*element)
            .cloned()
            .ok_or(BrowserError::PageClosed)
    }

    async fn full_document_markup(&self) -> BrowserResult<String> {
        self.ensure_open()?;
        if self.page.panic_on_document {
            panic!("renderer crashed while serializing the document");
        }
        Ok(self.page.document.clone())
    }

    async fn close(&mut self) {
        lock(&self.stats).close_calls += 1;
        if !self.latch.begin() {
            return;
        }
        {
            let mut stats = lock(&self.stats);
            stats.closes += 1;
            stats.live_sessions = stats.live_sessions.saturating_sub(1);
        }
        self.page_open = false;
        if let Ok(tx) = self.load_tx.get_mut() {
            tx.take();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
