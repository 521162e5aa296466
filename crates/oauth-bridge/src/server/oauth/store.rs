//! Expiring in-memory key/value stores.
//!
//! Every store in the authorization pipeline sits behind [`KvStore`], so a
//! deployment can swap the in-memory map for a shared external store without
//! touching the route handlers. The one-time operations (`take`, `take_if`)
//! check and mutate under a single write guard; there is no await point between
//! the lookup and the removal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A stored value with its expiry deadline.
#[derive(Debug, Clone)]
pub struct Expiring<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> Expiring<V> {
    /// Wrap a value that expires `ttl` from now.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    /// Check if the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Outcome of a conditional [`KvStore::take_if`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take<V> {
    /// The predicate accepted the entry; it has been removed.
    Taken(V),
    /// The predicate rejected the entry; it is still stored.
    Rejected,
    /// No live entry under that key.
    Missing,
}

/// Predicate evaluated against a live entry inside [`KvStore::take_if`].
pub type Accept<'a, V> = dyn Fn(&V) -> bool + Send + Sync + 'a;

/// Expiring key/value store.
///
/// Expired entries are never returned. Reads that encounter one delete it;
/// deletes are always delete-if-present.
#[async_trait]
pub trait KvStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Insert or replace `key`; last write wins.
    async fn set(&self, key: String, value: V, ttl: Duration);

    /// Read a live entry without consuming it.
    async fn get(&self, key: &str) -> Option<V>;

    /// Remove `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Atomically read and remove a live entry.
    async fn take(&self, key: &str) -> Option<V>;

    /// Atomically remove a live entry only if `accept` returns true for it.
    async fn take_if(&self, key: &str, accept: &Accept<'_, V>) -> Take<V>;

    /// Remove every expired entry. Returns how many were removed.
    async fn sweep(&self) -> usize;

    /// Number of stored entries, including expired ones not yet swept.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// [`KvStore`] over a `RwLock<HashMap>`.
pub struct InMemoryStore<V> {
    entries: RwLock<HashMap<String, Expiring<V>>>,
}

impl<V> InMemoryStore<V> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for InMemoryStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

#[async_trait]
impl<V> KvStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn set(&self, key: String, value: V, ttl: Duration) {
        self.entries.write().await.insert(key, Expiring::new(value, ttl));
    }

    async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer replaced it in the meantime.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(Expiring::is_expired) {
            entries.remove(key);
        }
        None
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn take(&self, key: &str) -> Option<V> {
        let entry = self.entries.write().await.remove(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.value)
    }

    async fn take_if(&self, key: &str, accept: &Accept<'_, V>) -> Take<V> {
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get(key) else {
            return Take::Missing;
        };
        if entry.is_expired() {
            entries.remove(key);
            return Take::Missing;
        }
        if !accept(&entry.value) {
            return Take::Rejected;
        }

        entries.remove(key).map_or(Take::Missing, |e| Take::Taken(e.value))
    }

    async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Start a background task that sweeps `store` every `every`.
///
/// The task holds a weak reference and exits once the store is dropped.
pub fn spawn_sweeper<V>(
    store: &Arc<dyn KvStore<V>>,
    name: &'static str,
    every: Duration,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let store = Arc::downgrade(store);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(store) = store.upgrade() else {
                tracing::debug!(store = name, "Store dropped, stopping sweeper");
                break;
            };
            let removed = store.sweep().await;
            if removed > 0 {
                tracing::debug!(store = name, count = removed, "Swept expired entries");
            }
        }
    })
}
