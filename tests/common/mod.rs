//! Shared fixtures for the integration tests
//!
//! `FixtureEngine` serves a fixed page without touching Chrome: the load event fires
//! right after navigation and the selector either matches from the first poll or never.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::oneshot;

use scrape_api::server::{AppState, router};
use scrape_api::{
    BrowserEngine, BrowserResult, LaunchOptions, LoadSignal, PageSession, ScrapeConfig,
    ScrapeManager,
};

pub const SALT: &str = "integration-salt";

pub const PAGE: &str = "<html><body><h1>Fixture</h1><p>one</p><p>two</p></body></html>";

#[derive(Clone, Default)]
pub struct FixtureEngine {
    pub launches: Arc<AtomicU32>,
    pub closes: Arc<AtomicU32>,
}

impl FixtureEngine {
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserEngine for FixtureEngine {
    type Session = FixtureSession;

    async fn launch(&self, _options: &LaunchOptions) -> BrowserResult<FixtureSession> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureSession {
            closes: self.closes.clone(),
            load_tx: Mutex::new(None),
        })
    }
}

pub struct FixtureSession {
    closes: Arc<AtomicU32>,
    load_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl PageSession for FixtureSession {
    type Element = String;

    async fn open_page(&mut self) -> BrowserResult<()> {
        Ok(())
    }

    async fn subscribe_load(&mut self) -> BrowserResult<LoadSignal> {
        let (tx, rx) = oneshot::channel();
        *self.load_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn navigate(&self, _url: &str) -> BrowserResult<()> {
        if let Some(tx) = self.load_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<String>> {
        Ok(match selector {
            "h1" => vec!["<h1>Fixture</h1>".to_string()],
            "p" => vec!["<p>one</p>".to_string(), "<p>two</p>".to_string()],
            _ => Vec::new(),
        })
    }

    async fn outer_markup(&self, element: &String) -> BrowserResult<String> {
        Ok(element.clone())
    }

    async fn full_document_markup(&self) -> BrowserResult<String> {
        Ok(PAGE.to_string())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.load_tx.lock().unwrap().take();
    }
}

pub fn app(engine: FixtureEngine) -> axum::Router {
    let manager = ScrapeManager::from_config(engine, &ScrapeConfig::default());
    router(AppState::new(manager, SALT))
}
