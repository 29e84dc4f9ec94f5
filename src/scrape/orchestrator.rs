//! Scrape orchestrator: one isolated browser session per request
//!
//! # Run sequence
//!
//! 1. Launch an engine and open its page (`EngineLaunch` on failure)
//! 2. Subscribe to `load`, arm the [`LoadTimeoutGuard`], dispatch navigation
//! 3. `load` first: disarm the guard and let the [`ReadinessPoller`] resolve the content
//! 4. Deadline first: `PageLoadTimeout`
//! 5. Close the session, whatever happened above, then return
//!
//! A panic raised by the engine is caught too: during launch it resolves as
//! `EngineLaunch`; later on the session is closed first and the run resolves as
//! `EngineError`.
//!
//! A navigation dispatch error is only logged: a delayed `load` may still arrive, and
//! the guard bounds the wait either way.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::{
    LoadTimeoutGuard, ReadinessPoller, ScrapeFailure, ScrapeRequest, ScrapeResult,
    session_event,
};
use crate::ScrapeConfig;
use crate::browser::{BrowserEngine, LaunchOptions, PageSession};

pub struct ScrapeOrchestrator<E: BrowserEngine> {
    engine: E,
    guard: LoadTimeoutGuard,
    poller: ReadinessPoller,
}

impl<E: BrowserEngine> ScrapeOrchestrator<E> {
    pub fn new(engine: E, guard: LoadTimeoutGuard, poller: ReadinessPoller) -> Self {
        Self {
            engine,
            guard,
            poller,
        }
    }

    pub fn from_config(engine: E, settings: &ScrapeConfig) -> Self {
        Self::new(
            engine,
            LoadTimeoutGuard::new(Duration::from_millis(settings.load_timeout_ms)),
            ReadinessPoller::new(
                Duration::from_millis(settings.poll_interval_ms),
                settings.max_poll_attempts,
            ),
        )
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run one scrape to completion.
    pub async fn orchestrate(&self, request: &ScrapeRequest) -> ScrapeResult {
        self.orchestrate_until(request, &CancellationToken::new()).await
    }

    /// Run one scrape, giving up with [`Cancelled`](super::FailureKind::Cancelled) once
    /// `cancel` fires.
    ///
    /// The session is closed exactly once before this returns, on every path. A panic
    /// inside the run becomes an `EngineError` after teardown.
    pub async fn orchestrate_until(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> ScrapeResult {
        let sid = request.session_id.as_str();
        request.validate()?;

        session_event!(info, sid, "starting chrome browser");
        let options = LaunchOptions::with_proxy(request.proxy.as_deref());
        let launched = tokio::select! {
            biased;
            launched = AssertUnwindSafe(self.engine.launch(&options)).catch_unwind() => launched,
            () = cancel.cancelled() => return Err(ScrapeFailure::cancelled()),
        };
        let mut session = match launched {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!(session = %sid, "browser engine error: {}", e);
                return Err(ScrapeFailure::launch(e));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(session = %sid, "browser launch panicked: {}", message);
                return Err(ScrapeFailure::launch(format!("launch panicked: {message}")));
            }
        };

        let outcome = {
            let run = AssertUnwindSafe(self.drive(&mut session, request)).catch_unwind();
            tokio::select! {
                biased;
                outcome = run => outcome,
                () = cancel.cancelled() => {
                    session_event!(info, sid, "request cancelled by caller");
                    Ok(Err(ScrapeFailure::cancelled()))
                }
            }
        };

        session_event!(info, sid, "closing chrome browser");
        session.close().await;

        match outcome {
            Ok(result) => {
                match &result {
                    Ok(content) => {
                        session_event!(info, sid, "resolved content with {} bytes", content.len())
                    }
                    Err(failure) => session_event!(
                        info,
                        sid,
                        "resolved failure ({:?}): {}",
                        failure.kind,
                        failure.detail
                    ),
                }
                result
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(session = %sid, "scrape run panicked: {}", message);
                Err(ScrapeFailure::engine(format!("run panicked: {message}")))
            }
        }
    }

    async fn drive(&self, session: &mut E::Session, request: &ScrapeRequest) -> ScrapeResult {
        let sid = request.session_id.as_str();

        session.open_page().await.map_err(|e| {
            error!(session = %sid, "browser engine error: {}", e);
            ScrapeFailure::launch(e)
        })?;

        let load = session.subscribe_load().await.map_err(|e| {
            error!(session = %sid, "browser engine error: {}", e);
            ScrapeFailure::engine(e)
        })?;

        let guard = self.guard.arm();
        session_event!(info, sid, "going to: {}", request.url);

        match guard.bound(session.navigate(&request.url)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => session_event!(
                warn,
                sid,
                "error: {}, but continue to wait for onload yet another time",
                e
            ),
            None => session_event!(warn, sid, "navigation dispatch still pending at deadline"),
        }

        guard.race(load).await?;
        session_event!(debug, sid, "load event arrived, page load guard cleared");

        self.poller
            .resolve(
                &*session,
                request.readiness_selector(),
                request.return_full_page,
                sid,
            )
            .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
