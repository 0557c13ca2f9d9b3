use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A bounded wait exceeded its allotted duration.
///
/// Two `TimedOut` values always compare equal, regardless of how long each of them waited. The
/// [`Default`] value carries a zero duration.
#[derive(Clone, Copy, Debug, Default, Error)]
#[error("timed out after {duration:?}")]
pub struct TimedOut {
    duration: Duration,
}

impl TimedOut {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// The duration that was waited before giving up.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl PartialEq for TimedOut {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for TimedOut {}

/// The failure observed by everyone awaiting a [`SharedWork`](crate::SharedWork).
///
/// This is cheaply clonable so that a single failure can be handed to every observer of a shared
/// execution.
#[derive(Clone, Debug, Error)]
pub enum WorkError {
    /// The work was cancelled before it produced an output.
    #[error("work was cancelled")]
    Cancelled,
    /// The work itself failed.
    #[error("work failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    /// The work did not finish within its deadline.
    #[error(transparent)]
    TimedOut(#[from] TimedOut),
}

impl WorkError {
    /// Wraps an arbitrary upstream error.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(err.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// A short tag describing the error, used for metrics and logs.
    pub(crate) fn status(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
            Self::TimedOut(_) => "timeout",
        }
    }
}

/// Upstream failures are equal only if they are the very same failure, which is what every
/// observer of one shared execution receives.
impl PartialEq for WorkError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Failed(lhs), Self::Failed(rhs)) => Arc::ptr_eq(lhs, rhs),
            (Self::TimedOut(lhs), Self::TimedOut(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}
