//! Run deadline shared by every pass of one run.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::error;

use crate::errors::{Failure, FailureKind};

/// Point in time after which no more work is started.
///
/// An unbounded deadline never expires. Passes check it between records so
/// a timed-out pass still reports what it finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// `timeout` from now. A timeout too large to represent is unbounded.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Run `fut` until it completes or the deadline passes.
    ///
    /// Returns `None` without polling `fut` when the deadline already passed.
    pub async fn bound<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.expired() {
            return None;
        }
        match self.at {
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}

/// The failure recorded for a pass cut short by the deadline.
pub(crate) fn timeout_failure(scope: impl Into<String>) -> Failure {
    let scope = scope.into();
    error!("{} did not finish before the run deadline", scope);
    Failure::new(FailureKind::Timeout, scope, "run deadline exceeded")
}
