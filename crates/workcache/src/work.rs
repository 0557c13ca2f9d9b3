//! Units of work and their shared form.
//!
//! A [`Work`] is a boxed, not yet started computation with an identity. Lifecycle hooks can be
//! attached with [`Work::handle_events`]. Converting it with [`Work::share`] yields a
//! [`SharedWork`], which runs the computation at most once and hands the same outcome to every
//! observer.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use tokio_util::sync::CancellationToken;

use crate::cancel::Cancel;
use crate::error::WorkError;
use crate::executor::TaskExecutor;

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a unit of work.
///
/// The identity is assigned when the [`Work`] is created and carried over unchanged into its
/// [`SharedWork`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WorkId(u64);

impl WorkId {
    fn next() -> Self {
        Self(NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work-{}", self.0)
    }
}

type WorkFuture<T> = BoxFuture<'static, Result<T, WorkError>>;
type ResultChannel<T> = Shared<BoxFuture<'static, Result<T, WorkError>>>;

/// Runs a callback when dropped, unless it was taken out before.
///
/// Captured into a work future when the hooks are attached, so that dropping the future at any
/// point before completion (including before it was ever polled) counts as cancellation.
struct CancelGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> CancelGuard<F> {
    fn take(&mut self) -> Option<F> {
        self.0.take()
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// A single asynchronous computation that has not been started yet.
#[must_use = "work does nothing unless it is shared and run"]
pub struct Work<T> {
    id: WorkId,
    future: WorkFuture<T>,
}

impl<T: Send + 'static> Work<T> {
    /// Creates a unit of work from a fallible future.
    ///
    /// The error type is erased into [`WorkError::Failed`].
    pub fn new<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self::from_future(future.map_err(WorkError::failed))
    }

    /// Creates a unit of work from a future that already reports [`WorkError`]s.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, WorkError>> + Send + 'static,
    {
        Self {
            id: WorkId::next(),
            future: future.boxed(),
        }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Attaches observers that fire exactly once, at the terminal transition of this work.
    ///
    /// - `on_output` fires when the work produced a value.
    /// - `on_error` fires when the work failed.
    /// - `on_cancel` fires when the work is dropped before finishing, or when it finished with
    ///   [`WorkError::Cancelled`].
    ///
    /// The observers do not alter the result. The returned work keeps the same [`WorkId`].
    pub fn handle_events<O, E, C>(self, on_output: O, on_error: E, on_cancel: C) -> Self
    where
        O: FnOnce(&T) + Send + 'static,
        E: FnOnce(&WorkError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let Self { id, future } = self;
        let mut guard = CancelGuard(Some(on_cancel));

        let future = async move {
            let result = future.await;
            match &result {
                Ok(output) => {
                    guard.take();
                    on_output(output);
                }
                Err(WorkError::Cancelled) => {
                    if let Some(on_cancel) = guard.take() {
                        on_cancel();
                    }
                }
                Err(err) => {
                    guard.take();
                    on_error(err);
                }
            }
            result
        };

        Self {
            id,
            future: future.boxed(),
        }
    }
}

impl<T> Work<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Converts this work into its shared form, running on the current runtime.
    pub fn share(self) -> SharedWork<T> {
        self.share_on(TaskExecutor::current())
    }

    /// Converts this work into its shared form, running on the given executor.
    ///
    /// This does not start the work. It starts on the first call to [`SharedWork::start`] or
    /// [`SharedWork::run`] on any of its handles.
    pub fn share_on(self, executor: TaskExecutor) -> SharedWork<T> {
        let (sender, receiver) = oneshot::channel();

        let channel = receiver
            .unwrap_or_else(|_cancelled_error| Err(WorkError::Cancelled))
            .boxed()
            .shared();

        SharedWork {
            inner: Arc::new(SharedInner {
                id: self.id,
                executor,
                token: CancellationToken::new(),
                pending: Mutex::new(Some(PendingWork {
                    future: self.future,
                    sender,
                })),
                channel,
            }),
        }
    }
}

impl<T> fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").field("id", &self.id).finish()
    }
}

struct PendingWork<T> {
    future: WorkFuture<T>,
    sender: oneshot::Sender<Result<T, WorkError>>,
}

struct SharedInner<T> {
    id: WorkId,
    executor: TaskExecutor,
    token: CancellationToken,
    /// The computation, until somebody starts or cancels it.
    pending: Mutex<Option<PendingWork<T>>>,
    channel: ResultChannel<T>,
}

/// The shared form of a [`Work`].
///
/// All clones refer to the same underlying execution. The computation runs at most once, and
/// every observer receives the same output, the same error, or [`WorkError::Cancelled`].
pub struct SharedWork<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for SharedWork<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedWork<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> WorkId {
        self.inner.id
    }

    /// Whether [`cancel`](Self::cancel) was called on any handle of this work.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Whether both handles refer to the same execution.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Starts executing the work, unless it was already started or cancelled.
    ///
    /// This eagerly spawns the computation on the configured executor, even if nobody awaits its
    /// result.
    pub fn start(&self) {
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(PendingWork { future, sender }) = pending else {
            return;
        };

        let id = self.inner.id;
        let token = self.inner.token.clone();
        tracing::trace!(%id, "starting shared work");

        self.inner.executor.spawn(async move {
            let start = Instant::now();
            // Dropping the work future when cancelled fires its cancellation hooks before the
            // observers are notified.
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(WorkError::Cancelled),
                result = future => result,
            };

            let status = match &result {
                Ok(_) => "ok",
                Err(err) => err.status(),
            };
            tracing::trace!(%id, status, "shared work finished");
            metric!(timer("work.done") = start.elapsed(), "status" => status);

            sender.send(result).ok();
        });
    }

    /// Starts the work if needed, and waits for its outcome.
    pub async fn run(&self) -> Result<T, WorkError> {
        self.start();
        self.observe().await
    }

    /// Waits for the outcome of the work without starting it.
    pub fn observe(&self) -> impl Future<Output = Result<T, WorkError>> + Send + 'static {
        self.inner.channel.clone()
    }

    /// Cancels the single underlying execution.
    ///
    /// Every observer is notified with [`WorkError::Cancelled`]. Calling this more than once, or
    /// after the work has finished, has no effect.
    pub fn cancel(&self) {
        self.inner.token.cancel();

        // Work that never started is dropped right here, which fires its cancellation hooks.
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(PendingWork { future, sender }) = pending {
            tracing::trace!(id = %self.inner.id, "cancelled shared work before it started");
            drop(future);
            sender.send(Err(WorkError::Cancelled)).ok();
        }
    }
}

impl<T> Cancel for SharedWork<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cancel(&self) {
        SharedWork::cancel(self);
    }
}

impl<T> IntoFuture for SharedWork<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, WorkError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.run().await }.boxed()
    }
}

impl<T> fmt::Debug for SharedWork<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWork")
            .field("id", &self.inner.id)
            .field("cancelled", &self.inner.token.is_cancelled())
            .finish()
    }
}
