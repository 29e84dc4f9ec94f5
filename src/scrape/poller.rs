//! Readiness polling for pages that render content after `load`
//!
//! Many pages fill in their DOM with JavaScript long after the load event fires, so
//! the poller samples the selector on a fixed interval until it matches or the
//! attempt budget runs out.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::{FailureKind, ScrapeFailure, ScrapeResult, session_event};
use crate::browser::PageSession;

/// Attempt bookkeeping for one polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollState {
    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
    max_attempts: u32,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Resolve the content of a loaded page.
    ///
    /// Without a selector the full document is returned right away and no tick runs.
    /// Otherwise the first check happens one interval after entry, then once per
    /// interval until a match or until `max_attempts` checks came back empty.
    pub async fn resolve<S: PageSession>(
        &self,
        session: &S,
        selector: Option<&str>,
        return_full_page: bool,
        session_id: &str,
    ) -> ScrapeResult {
        let Some(selector) = selector else {
            session_event!(info, session_id, "page loaded; resolving content immediately");
            return session
                .full_document_markup()
                .await
                .map_err(ScrapeFailure::engine);
        };

        session_event!(
            info,
            session_id,
            "page loaded; looking for selector: '{}'. setting {} ms refresh interval",
            selector,
            self.interval.as_millis()
        );

        let mut state = PollState {
            attempts: 0,
            max_attempts: self.max_attempts,
            interval: self.interval,
        };

        // Ticks must never overlap or burst after a slow query
        let mut ticker = interval_at(Instant::now() + state.interval, state.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let elements = session
                .query_all(selector)
                .await
                .map_err(|e| {
                    tracing::error!(session = %session_id, "browser engine error: {}", e);
                    ScrapeFailure::engine(e)
                })?;

            if !elements.is_empty() {
                session_event!(
                    info,
                    session_id,
                    "element with selector: '{}' appeared, resolving content",
                    selector
                );
                return if return_full_page {
                    session
                        .full_document_markup()
                        .await
                        .map_err(ScrapeFailure::engine)
                } else {
                    extract_sequentially(session, &elements).await
                };
            }

            state.attempts += 1;
            if state.exhausted() {
                session_event!(
                    info,
                    session_id,
                    "element with selector: '{}' didn't appear after {} attempts, timeout",
                    selector,
                    state.attempts
                );
                return Err(ScrapeFailure::new(
                    FailureKind::ElementTimeout,
                    "didn't appear",
                ));
            }
        }
    }
}

/// Outer markup of every element, newline-joined, one element at a time.
///
/// Extraction calls against a page that is going away must not run concurrently;
/// the first failure aborts the batch.
async fn extract_sequentially<S: PageSession>(
    session: &S,
    elements: &[S::Element],
) -> ScrapeResult {
    let mut parts = Vec::with_capacity(elements.len());
    for element in elements {
        let markup = session
            .outer_markup(element)
            .await
            .map_err(ScrapeFailure::engine)?;
        parts.push(markup);
    }
    Ok(parts.join("\n"))
}
