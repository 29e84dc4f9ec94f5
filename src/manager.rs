//! Scrape run manager
//!
//! Sits between the transports and the [`ScrapeOrchestrator`]:
//! - bounds the number of Chrome processes alive at once (optional)
//! - decides whether a run outlives the caller that asked for it
//!
//! Each run still gets its own browser session. Nothing is pooled or shared between
//! requests; the manager only gates admission.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::ScrapeConfig;
use crate::browser::BrowserEngine;
use crate::scrape::{ScrapeFailure, ScrapeOrchestrator, ScrapeRequest, ScrapeResult};

pub struct ScrapeManager<E: BrowserEngine> {
    orchestrator: Arc<ScrapeOrchestrator<E>>,
    permits: Option<Arc<Semaphore>>,
    cancel_on_disconnect: bool,
}

impl<E: BrowserEngine> Clone for ScrapeManager<E> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            permits: self.permits.clone(),
            cancel_on_disconnect: self.cancel_on_disconnect,
        }
    }
}

impl<E: BrowserEngine + 'static> ScrapeManager<E> {
    /// `max_concurrent_sessions: None` admits every run immediately.
    pub fn new(
        orchestrator: ScrapeOrchestrator<E>,
        max_concurrent_sessions: Option<usize>,
        cancel_on_disconnect: bool,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            permits: max_concurrent_sessions.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            cancel_on_disconnect,
        }
    }

    pub fn from_config(engine: E, settings: &ScrapeConfig) -> Self {
        Self::new(
            ScrapeOrchestrator::from_config(engine, settings),
            settings.max_concurrent_sessions,
            settings.cancel_on_disconnect,
        )
    }

    pub fn orchestrator(&self) -> &ScrapeOrchestrator<E> {
        &self.orchestrator
    }

    /// Free session slots, `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    /// Run in the calling task until it completes.
    pub async fn run(&self, request: &ScrapeRequest) -> ScrapeResult {
        self.run_with(request, &CancellationToken::new()).await
    }

    /// Wait for a session slot, then run. `cancel` aborts either phase.
    pub async fn run_with(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> ScrapeResult {
        let _permit = self.admit(request, cancel).await?;
        self.orchestrator.orchestrate_until(request, cancel).await
    }

    /// Run on a task of its own and wait for the outcome.
    ///
    /// Dropping the returned future detaches the run: it still finishes and closes
    /// its session. With `cancel_on_disconnect` the run is cancelled instead, which
    /// also closes the session right away.
    pub async fn submit(&self, request: ScrapeRequest) -> ScrapeResult {
        let cancel = CancellationToken::new();
        let _disconnect = self
            .cancel_on_disconnect
            .then(|| cancel.clone().drop_guard());

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_with(&request, &cancel).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!("scrape task panicked: {}", e);
                Err(ScrapeFailure::engine("scrape task panicked"))
            }
            Err(e) => Err(ScrapeFailure::engine(e)),
        }
    }

    async fn admit(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<OwnedSemaphorePermit>, ScrapeFailure> {
        let Some(permits) = &self.permits else {
            return Ok(None);
        };
        if permits.available_permits() == 0 && !request.session_id.is_empty() {
            debug!(session = %request.session_id, "waiting for a free browser slot");
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ScrapeFailure::cancelled()),
            permit = permits.clone().acquire_owned() => permit
                .map(Some)
                .map_err(|_| ScrapeFailure::engine("session limiter closed")),
        }
    }
}
