//! HTTP front end for the scrape service.
//!
//! Routes:
//! - `POST /scrape` (and the legacy `POST /scrap`): signed scrape request, markup or
//!   failure detail as `text/plain`
//! - `GET /health`: liveness probe

pub mod signature;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::browser::{BrowserEngine, ChromeEngine};
use crate::scrape::{ScrapeFailure, ScrapeRequest, new_session_id};
use crate::{Config, ScrapeManager};

/// JSON body of a scrape call.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeBody {
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
    /// `md5("{url}:{salt}")`; a missing hash is rejected like a wrong one
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default, rename = "fullPage")]
    pub full_page: bool,
}

impl ScrapeBody {
    fn into_request(self, session_id: String) -> ScrapeRequest {
        let mut request = ScrapeRequest::new(self.url)
            .with_full_page(self.full_page)
            .with_session_id(session_id);
        if let Some(selector) = self.selector {
            request = request.with_selector(selector);
        }
        if let Some(proxy) = self.proxy {
            request = request.with_proxy(proxy);
        }
        request
    }
}

pub struct AppState<E: BrowserEngine> {
    pub manager: ScrapeManager<E>,
    pub salt: String,
}

impl<E: BrowserEngine> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            salt: self.salt.clone(),
        }
    }
}

impl<E: BrowserEngine + 'static> AppState<E> {
    pub fn new(manager: ScrapeManager<E>, salt: impl Into<String>) -> Self {
        Self {
            manager,
            salt: salt.into(),
        }
    }
}

pub fn router<E: BrowserEngine + 'static>(state: AppState<E>) -> Router {
    Router::new()
        .route("/scrape", post(handle_scrape::<E>))
        .route("/scrap", post(handle_scrape::<E>))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;

    if config.uses_default_salt() {
        warn!(
            "using default 'NO-SALT' salt, you should provide some randomly generated string as SALT environment variable"
        );
    } else {
        info!("using a configured request salt");
    }

    let engine = ChromeEngine::new(config.browser.clone());
    let manager = ScrapeManager::from_config(engine, &config.scrape);
    let app = router(AppState::new(manager, config.server.salt.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!("Scrape API is listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Scrape API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_scrape<E: BrowserEngine + 'static>(
    State(state): State<AppState<E>>,
    headers: HeaderMap,
    Json(body): Json<ScrapeBody>,
) -> Response {
    let session_id = new_session_id();
    let requester = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("direct");
    info!(session = %session_id, "requesting from: {} to fetch: {}", requester, body.url);

    if let Err(e) = signature::verify(&body.url, &body.hash, &state.salt) {
        info!(session = %session_id, "sending error: {}", e);
        return text(StatusCode::BAD_REQUEST, e.to_string());
    }

    let request = body.into_request(session_id.clone());
    match state.manager.submit(request).await {
        Ok(content) => {
            info!(session = %session_id, "sending data with: {} bytes", content.len());
            text(StatusCode::OK, content)
        }
        Err(failure) => {
            info!(session = %session_id, "sending error: {}", failure);
            failure_response(&failure)
        }
    }
}

fn failure_response(failure: &ScrapeFailure) -> Response {
    let status = StatusCode::from_u16(failure.kind.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text(status, failure.detail.clone())
}

fn text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
