use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawns futures onto a tokio runtime.
///
/// An executor either targets an explicit runtime [`Handle`], or the runtime that is current at
/// the time of spawning. The latter is what [`TaskExecutor::default`] and
/// [`TaskExecutor::current`] give you.
///
/// Spawned futures are instrumented with the span that is current when they are spawned.
#[derive(Clone, Debug, Default)]
pub struct TaskExecutor {
    handle: Option<Handle>,
}

impl TaskExecutor {
    /// Creates an executor spawning onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Creates an executor that spawns onto whatever runtime is current when spawning.
    pub fn current() -> Self {
        Self::default()
    }

    /// Spawns a future as an independent task.
    ///
    /// # Panics
    ///
    /// Panics if this executor has no explicit runtime and is used outside of a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let future = future.in_current_span();
        match &self.handle {
            Some(handle) => handle.spawn(future),
            None => tokio::spawn(future),
        }
    }
}
