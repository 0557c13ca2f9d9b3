//! Helpers for testing the work cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Works created by the helpers in this crate count their executions in an
//!    [`ExecutionCounter`]. Clone the counter into every work that should count towards it, and
//!    assert on [`ExecutionCounter::get`] once all results have been observed.
//!
//!  - Use an [`EventLog`] to assert on the order in which hooks and operations ran.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use workcache::{Work, WorkError};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `workcache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("workcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts how often the underlying computations of works actually ran.
#[derive(Clone, Debug, Default)]
pub struct ExecutionCounter(Arc<AtomicUsize>);

impl ExecutionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of executions so far.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A shared, ordered record of events.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    /// Returns a snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Returns a closure that records `event` when called.
    pub fn recorder(&self, event: &'static str) -> impl FnOnce() + Send + 'static {
        let log = self.clone();
        move || log.push(event)
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events()).finish()
    }
}

/// Creates work that counts one execution, waits for `delay` and yields `value`.
pub fn value_work<T>(counter: &ExecutionCounter, value: T, delay: Duration) -> Work<T>
where
    T: Send + 'static,
{
    let counter = counter.clone();
    Work::from_future(async move {
        counter.bump();
        tokio::time::sleep(delay).await;
        Ok(value)
    })
}

/// Creates work that counts one execution, waits for `delay` and fails with `message`.
pub fn failing_work<T>(
    counter: &ExecutionCounter,
    message: &'static str,
    delay: Duration,
) -> Work<T>
where
    T: Send + 'static,
{
    let counter = counter.clone();
    Work::new(async move {
        counter.bump();
        tokio::time::sleep(delay).await;
        Err::<T, _>(anyhow::anyhow!(message))
    })
}

/// Creates work that counts one execution and then never finishes.
pub fn pending_work<T>(counter: &ExecutionCounter) -> Work<T>
where
    T: Send + 'static,
{
    let counter = counter.clone();
    Work::from_future(async move {
        counter.bump();
        std::future::pending::<Result<T, WorkError>>().await
    })
}
