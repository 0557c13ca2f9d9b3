//! Admission policies for the [`WorkCache`].
use serde::Deserialize;

use crate::cache::{CacheKey, WorkCache};
use crate::work::{SharedWork, Work};

/// Decides what happens when work is requested for a key that may already be in flight.
///
/// Both strategies attach hooks to the requested work which evict it from the cache once it
/// produced an output, failed, or was cancelled. Eviction is identity checked: a work only ever
/// removes its own entry, never one that replaced it in the meantime.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Joins the in-flight work for the key, if there is one.
    ///
    /// The first request starts the work, and every request arriving before it terminates shares
    /// its outcome. Observers that already joined still receive the outcome after eviction.
    #[default]
    CacheUntilCompletionOrCancellation,
    /// Cancels the in-flight work for the key, and replaces it with the requested one.
    ///
    /// The cancellation is not awaited. The superseded work may still be winding down when its
    /// replacement is installed.
    CancelAndRetry,
}

impl CacheStrategy {
    /// Applies this strategy to `work`, returning the shared work the caller should run.
    pub fn handle<T>(self, work: Work<T>, key: CacheKey, cache: &WorkCache) -> SharedWork<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self {
            Self::CacheUntilCompletionOrCancellation => {
                let work = evict_on_termination(work, key, cache);
                cache.retrieve_or_create(work, key)
            }
            Self::CancelAndRetry => {
                // The superseded work may have any success type, it is cancelled regardless.
                if cache.cancel(key) {
                    metric!(counter("work_cache.superseded") += 1);
                }
                let work = evict_on_termination(work, key, cache);
                cache.create(work, key)
            }
        }
    }
}

fn evict_on_termination<T>(work: Work<T>, key: CacheKey, cache: &WorkCache) -> Work<T>
where
    T: Send + 'static,
{
    let evict = cache.evict_on_termination(key, work.id());
    let on_output = evict.clone();
    let on_error = evict.clone();
    work.handle_events(move |_| on_output(), move |_| on_error(), evict)
}
