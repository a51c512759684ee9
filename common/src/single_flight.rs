//! Keyed, cache-forever single-flight computations.
//!
//! The first caller for a key spawns the computation on the runtime; every
//! caller (concurrent or later) awaits a clone of the same shared result.
//! The computation is a detached task, so a caller dropping its wait does
//! not cancel it for anyone else.

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::{Mutex, MutexGuard},
};

use futures_util::future::{BoxFuture, FutureExt, Shared};

/// Pending or completed result of a single-flight computation. Resolves to
/// `None` if the computation panicked.
pub type SharedResult<V> = Shared<BoxFuture<'static, Option<V>>>;

pub struct SingleFlight<K, V> {
    entries: Mutex<HashMap<K, SharedResult<V>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared result for `key`, spawning `compute` only if no
    /// entry exists yet. The lock is held just long enough to look up or
    /// insert the entry, never across the computation.
    pub fn get_or_spawn<F, Fut>(&self, key: K, compute: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            tracing::trace!(key = ?key, "Joining existing computation");
            return existing.clone();
        }

        let handle = tokio::spawn(compute());
        let label = key.clone();
        let shared = async move {
            match handle.await {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!(key = ?label, "Single-flight computation failed: {}", e);
                    None
                }
            }
        }
        .boxed()
        .shared();

        entries.insert(key, shared.clone());
        shared
    }

    /// The completed result for `key`, if there is one.
    pub fn peek(&self, key: &K) -> Option<Option<V>> {
        self.lock().get(key).and_then(|entry| entry.peek().cloned())
    }

    /// Number of keys ever requested.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, SharedResult<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
