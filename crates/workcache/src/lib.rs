//! Coordination primitives for asynchronous units of work.
//!
//! The centerpiece is the [`WorkCache`], a registry of in-flight computations keyed by a
//! [`CacheKey`]. A [`CacheStrategy`] decides whether a request joins an already running
//! computation or supersedes it, and wires eviction hooks so that entries remove themselves once
//! their work terminates.
//!
//! The [`barrier`] module provides a one-shot [`SingleValueSubject`] and
//! [`wait_until_scheduled`], which spawns a task and only returns once that task is known to
//! be running.

#[macro_use]
pub mod metrics;

pub mod barrier;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod poll;
pub mod strategy;
pub mod work;

pub use barrier::{BarrierError, Signal, SingleValueSubject, wait_until_scheduled};
pub use cache::{CacheKey, WorkCache};
pub use cancel::{Cancel, CancellableHandle};
pub use error::{TimedOut, WorkError};
pub use executor::TaskExecutor;
pub use poll::wait_until;
pub use strategy::CacheStrategy;
pub use work::{SharedWork, Work, WorkId};
