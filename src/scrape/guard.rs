//! Page-load timeout guard
//!
//! Navigation can hang without ever surfacing an error (DNS stalls, silent resets,
//! interstitials). The guard is a single deadline raced against the page `load` event:
//! whichever resolves first wins and the other branch is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};

use super::{FailureKind, ScrapeFailure};
use crate::browser::LoadSignal;

/// Fixed page-load window, armed once per run.
#[derive(Debug, Clone, Copy)]
pub struct LoadTimeoutGuard {
    window: Duration,
}

impl LoadTimeoutGuard {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start the timer now.
    pub fn arm(&self) -> ArmedGuard {
        ArmedGuard {
            deadline: Instant::now() + self.window,
            window: self.window,
        }
    }
}

/// A running guard timer. Consumed by [`ArmedGuard::race`]; dropping it disarms it.
#[derive(Debug)]
pub struct ArmedGuard {
    deadline: Instant,
    window: Duration,
}

impl ArmedGuard {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run a setup step under the same deadline. `None` means the deadline passed first.
    pub async fn bound<F: Future>(&self, step: F) -> Option<F::Output> {
        timeout_at(self.deadline, step).await.ok()
    }

    /// Wait for the load event or the deadline, whichever comes first.
    ///
    /// A load signal whose sender went away without firing can no longer win, so the
    /// timer decides. On a tie the load event wins.
    pub async fn race(self, load: LoadSignal) -> Result<(), ScrapeFailure> {
        let loaded = async move {
            if load.await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            () = loaded => Ok(()),
            () = sleep_until(self.deadline) => Err(self.expired()),
        }
    }

    fn expired(&self) -> ScrapeFailure {
        ScrapeFailure::new(
            FailureKind::PageLoadTimeout,
            format!("pageload timeout after {}ms", self.window.as_millis()),
        )
    }
}
