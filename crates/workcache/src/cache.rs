//! A registry of in-flight units of work.
//!
//! The [`WorkCache`] maps a [`CacheKey`] to the [`SharedWork`] currently computing it. It does not
//! remember outcomes: once a work terminates, its entry is evicted and the next request for the
//! key starts fresh. Which request installs, joins or supersedes an entry is decided by a
//! [`CacheStrategy`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::Config;
use crate::executor::TaskExecutor;
use crate::strategy::CacheStrategy;
use crate::work::{SharedWork, Work, WorkId};

/// An integer fingerprint identifying logically equivalent requests.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CacheKey(pub u64);

impl From<u64> for CacheKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A [`SharedWork`] with its success type erased.
trait ErasedEntry: Send + Sync {
    fn id(&self) -> WorkId;
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedEntry for SharedWork<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> WorkId {
        SharedWork::id(self)
    }

    fn cancel(&self) {
        SharedWork::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        SharedWork::is_cancelled(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Entries = HashMap<CacheKey, Arc<dyn ErasedEntry>>;

struct CacheInner {
    executor: TaskExecutor,
    strategy: CacheStrategy,
    entries: Mutex<Entries>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if(&self, key: CacheKey, id: WorkId) -> bool {
        let evicted = {
            let mut entries = self.lock();
            match entries.get(&key) {
                Some(entry) if entry.id() == id => {
                    let evicted = entries.remove(&key);
                    metric!(gauge("work_cache.entries") = entries.len() as u64);
                    evicted
                }
                _ => None,
            }
        };

        match evicted {
            Some(_) => {
                tracing::debug!(%key, %id, "evicted finished work");
                metric!(counter("work_cache.evicted") += 1);
                true
            }
            None => {
                tracing::trace!(%key, %id, "finished work was no longer cached");
                false
            }
        }
    }
}

/// Deduplicates concurrent units of work by key.
///
/// This is a cheaply clonable handle; all clones share the same entries. Separate caches created
/// with [`WorkCache::new`] are fully independent of each other.
///
/// All operations complete synchronously. The internal lock is never held while running user
/// code: cancellation hooks of replaced or discarded work fire only after it was released.
#[derive(Clone)]
pub struct WorkCache {
    inner: Arc<CacheInner>,
}

impl WorkCache {
    /// Creates an empty cache whose work runs on the current runtime.
    pub fn new() -> Self {
        Self::with_executor(TaskExecutor::current())
    }

    /// Creates an empty cache whose work runs on the given executor.
    pub fn with_executor(executor: TaskExecutor) -> Self {
        Self::with_strategy(executor, CacheStrategy::default())
    }

    /// Creates an empty cache using the configured default strategy.
    pub fn from_config(config: &Config, executor: TaskExecutor) -> Self {
        Self::with_strategy(executor, config.default_strategy)
    }

    fn with_strategy(executor: TaskExecutor, strategy: CacheStrategy) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                executor,
                strategy,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The strategy applied by [`handle`](Self::handle).
    pub fn strategy(&self) -> CacheStrategy {
        self.inner.strategy
    }

    /// Looks up the in-flight work for `key`.
    ///
    /// An entry that was created with a different success type is reported as absent.
    pub fn retrieve<T>(&self, key: CacheKey) -> Option<SharedWork<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self.inner.lock();
        downcast(key, &**entries.get(&key)?)
    }

    /// Stores `work` under `key` in its shared form, replacing any existing entry.
    ///
    /// The work is not started. Replacing an entry does not cancel it; callers that want that must
    /// cancel it themselves beforehand.
    pub fn create<T>(&self, work: Work<T>, key: CacheKey) -> SharedWork<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let shared = work.share_on(self.inner.executor.clone());

        let replaced = {
            let mut entries = self.inner.lock();
            let replaced = entries.insert(key, Arc::new(shared.clone()));
            metric!(gauge("work_cache.entries") = entries.len() as u64);
            replaced
        };

        if let Some(replaced) = &replaced {
            tracing::debug!(%key, id = %replaced.id(), "replaced cached work");
        }
        tracing::trace!(%key, id = %shared.id(), "created cached work");

        shared
    }

    /// Returns the in-flight work for `key`, or stores `work` if there is none.
    ///
    /// This is atomic: out of any number of concurrent callers for the same key, exactly one
    /// installs its work, and all of them get a handle to that same execution. The work of every
    /// other caller is dropped without ever running, which fires its cancellation hooks.
    ///
    /// An entry that was already cancelled is treated as absent. So is an entry with a different
    /// success type, which is cancelled when it gets replaced.
    pub fn retrieve_or_create<T>(&self, work: Work<T>, key: CacheKey) -> SharedWork<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.inner.lock();

        // Work that was already cancelled is on its way out and gets replaced.
        let existing = entries
            .get(&key)
            .filter(|entry| !entry.is_cancelled())
            .and_then(|entry| downcast::<T>(key, &**entry));
        if let Some(existing) = existing {
            drop(entries);
            // A concurrent request was deduplicated.
            metric!(counter("work_cache.hit") += 1);
            tracing::trace!(%key, id = %existing.id(), "joined in-flight work");
            // Dropping the unused work fires its cancellation hooks, so release the lock first.
            drop(work);
            return existing;
        }

        metric!(counter("work_cache.miss") += 1);
        let shared = work.share_on(self.inner.executor.clone());
        let replaced = entries.insert(key, Arc::new(shared.clone()));
        metric!(gauge("work_cache.entries") = entries.len() as u64);
        drop(entries);

        tracing::trace!(%key, id = %shared.id(), "created cached work");
        // At most one live work per key: whatever was replaced must not keep running unseen.
        if let Some(replaced) = replaced {
            replaced.cancel();
        }

        shared
    }

    /// Cancels the work stored under `key`, whatever its success type.
    ///
    /// The entry itself is left in place, its eviction hooks remove it once the cancellation
    /// took effect. Returns whether a work that was not cancelled before was found.
    pub fn cancel(&self, key: CacheKey) -> bool {
        let entry = self.inner.lock().get(&key).cloned();
        match entry {
            Some(entry) if !entry.is_cancelled() => {
                tracing::debug!(%key, id = %entry.id(), "cancelling cached work");
                entry.cancel();
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `key`, if any.
    ///
    /// This does not cancel the removed work.
    pub fn remove(&self, key: CacheKey) {
        let removed = {
            let mut entries = self.inner.lock();
            let removed = entries.remove(&key);
            metric!(gauge("work_cache.entries") = entries.len() as u64);
            removed
        };
        if let Some(removed) = removed {
            tracing::debug!(%key, id = %removed.id(), "removed cached work");
        }
    }

    /// Removes the entry for `key`, but only if it is the work identified by `id`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove_if(&self, key: CacheKey, id: WorkId) -> bool {
        self.inner.remove_if(key, id)
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        self.inner.lock().contains_key(&key)
    }

    /// The number of units of work currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles `work` according to this cache's default strategy.
    pub fn handle<T>(&self, work: Work<T>, key: CacheKey) -> SharedWork<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.handle_with(self.inner.strategy, work, key)
    }

    /// Handles `work` according to `strategy`.
    pub fn handle_with<T>(
        &self,
        strategy: CacheStrategy,
        work: Work<T>,
        key: CacheKey,
    ) -> SharedWork<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        strategy.handle(work, key, self)
    }

    /// Creates the hook that evicts `id` from `key` once it terminates.
    ///
    /// The hook only holds a weak reference to the cache, and does nothing once the cache is gone.
    pub(crate) fn evict_on_termination(
        &self,
        key: CacheKey,
        id: WorkId,
    ) -> impl Fn() + Clone + Send + 'static {
        let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
        move || {
            if let Some(cache) = cache.upgrade() {
                cache.remove_if(key, id);
            }
        }
    }
}

impl Default for WorkCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkCache")
            .field("entries", &self.len())
            .finish()
    }
}

fn downcast<T>(key: CacheKey, entry: &dyn ErasedEntry) -> Option<SharedWork<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let shared = entry.as_any().downcast_ref::<SharedWork<T>>().cloned();
    if shared.is_none() {
        tracing::warn!(
            %key,
            expected = std::any::type_name::<T>(),
            "cached work has a different output type"
        );
    }
    shared
}
