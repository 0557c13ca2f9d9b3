//! A one-shot scheduling barrier.
//!
//! Spawning a task gives no guarantee about when that task actually starts running relative to
//! its spawner. [`wait_until_scheduled`] closes that gap: it only returns once the spawned task
//! has been polled for the first time, so that cancellation issued right afterwards reaches a
//! task that has begun executing.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::error::TimedOut;
use crate::executor::TaskExecutor;

/// Protocol violations of a [`SingleValueSubject`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum BarrierError {
    /// A value was sent more than once.
    #[error("a value was already sent")]
    AlreadySent,
    /// Every producer went away without sending a value.
    #[error("the subject was abandoned without a value")]
    Abandoned,
    /// The waiting side went away before the value was sent.
    #[error("nobody is waiting for the value")]
    Closed,
    /// No value arrived in time.
    #[error(transparent)]
    TimedOut(#[from] TimedOut),
}

/// The producing side of a [`SingleValueSubject`].
///
/// All clones share one slot, so only the first [`send`](Self::send) across all of them succeeds.
pub struct Signal<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> Signal<T> {
    /// Latches `value` into the subject.
    ///
    /// Fails with [`BarrierError::AlreadySent`] if any clone of this signal sent before.
    pub fn send(&self, value: T) -> Result<(), BarrierError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BarrierError::AlreadySent)?;

        sender.send(value).map_err(|_| BarrierError::Closed)
    }
}

/// A single value handed from a producer to exactly one waiter.
///
/// The value is latched: sending before anybody waits is fine, the waiter picks it up later.
pub struct SingleValueSubject<T> {
    signal: Signal<T>,
    receiver: oneshot::Receiver<T>,
}

impl<T> SingleValueSubject<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            signal: Signal {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        }
    }

    /// Returns a producer handle for this subject.
    pub fn signal(&self) -> Signal<T> {
        self.signal.clone()
    }

    /// Latches `value` into this subject. See [`Signal::send`].
    pub fn send(&self, value: T) -> Result<(), BarrierError> {
        self.signal.send(value)
    }

    /// Waits for the value.
    ///
    /// Fails with [`BarrierError::Abandoned`] once every [`Signal`] handed out by
    /// [`signal`](Self::signal) was dropped without sending.
    pub async fn execute(self) -> Result<T, BarrierError> {
        let Self { signal, receiver } = self;
        // From here on, only the signals handed out can still send.
        drop(signal);
        receiver.await.map_err(|_| BarrierError::Abandoned)
    }

    /// Waits for the value, giving up after `duration`.
    pub async fn execute_timeout(self, duration: Duration) -> Result<T, BarrierError> {
        match tokio::time::timeout(duration, self.execute()).await {
            Ok(result) => result,
            Err(_) => Err(TimedOut::new(duration).into()),
        }
    }
}

impl<T> Default for SingleValueSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps `operation` so that it signals after it was polled for the first time.
///
/// The signal is sent even if that first poll already completes the operation.
fn signal_when_started<F>(operation: F, signal: Signal<()>) -> impl Future<Output = F::Output>
where
    F: Future,
{
    async move {
        let mut operation = std::pin::pin!(operation);
        let mut signal = Some(signal);
        std::future::poll_fn(move |cx| {
            let poll = operation.as_mut().poll(cx);
            if let Some(signal) = signal.take() {
                // The spawner may have stopped waiting, which is fine.
                signal.send(()).ok();
            }
            poll
        })
        .await
    }
}

impl TaskExecutor {
    /// Spawns `operation` and waits until it has started executing.
    ///
    /// Returns the handle of the spawned task. If the task never starts, for example because it
    /// was aborted or the runtime shut down, this fails with [`BarrierError::Abandoned`].
    pub async fn spawn_scheduled<F>(
        &self,
        operation: F,
    ) -> Result<JoinHandle<F::Output>, BarrierError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let subject = SingleValueSubject::new();
        let handle = self.spawn(signal_when_started(operation, subject.signal()));

        match subject.execute().await {
            Ok(()) => Ok(handle),
            Err(err) => {
                handle.abort();
                Err(err)
            }
        }
    }

    /// Like [`spawn_scheduled`](Self::spawn_scheduled), but gives up after `duration`.
    ///
    /// The spawned task is aborted when it did not start in time.
    pub async fn spawn_scheduled_timeout<F>(
        &self,
        operation: F,
        duration: Duration,
    ) -> Result<JoinHandle<F::Output>, BarrierError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let subject = SingleValueSubject::new();
        let handle = self.spawn(signal_when_started(operation, subject.signal()));

        match subject.execute_timeout(duration).await {
            Ok(()) => Ok(handle),
            Err(err) => {
                handle.abort();
                Err(err)
            }
        }
    }
}

/// Spawns `operation` on the current runtime and waits until it has started executing.
///
/// See [`TaskExecutor::spawn_scheduled`].
pub async fn wait_until_scheduled<F>(operation: F) -> Result<JoinHandle<F::Output>, BarrierError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    TaskExecutor::current().spawn_scheduled(operation).await
}
