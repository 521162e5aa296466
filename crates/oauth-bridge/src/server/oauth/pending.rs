//! Pending authorizations: requests that went upstream and have not come back yet.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::store::{InMemoryStore, KvStore, spawn_sweeper};
use super::types::PendingAuthorization;
use crate::config::lifetimes;

/// Short-lived record of in-flight authorization requests, keyed by state.
pub struct PendingAuthorizationStore {
    pending: Arc<dyn KvStore<PendingAuthorization>>,
    ttl: Duration,
}

impl PendingAuthorizationStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), ttl)
    }

    /// Use an alternative backing store.
    #[must_use]
    pub fn with_store(pending: Arc<dyn KvStore<PendingAuthorization>>, ttl: Duration) -> Self {
        Self { pending, ttl }
    }

    /// Record a pending authorization. A newer request with the same state replaces it.
    pub async fn store(&self, authorization: PendingAuthorization) {
        tracing::debug!(client_id = %authorization.client_id, "Storing pending authorization");
        self.pending.set(authorization.state.clone(), authorization, self.ttl).await;
    }

    /// Remove and return the pending authorization for `state`.
    ///
    /// Only one caller ever observes a given entry. Expired entries are
    /// discarded and reported as absent.
    pub async fn take_and_remove(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending.take(state).await
    }

    /// Number of pending authorizations, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.pending.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.is_empty().await
    }

    /// Start the background sweep of abandoned authorizations.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        spawn_sweeper(&self.pending, "pending_authorizations", lifetimes::PENDING_SWEEP)
    }
}

impl Default for PendingAuthorizationStore {
    fn default() -> Self {
        Self::new(lifetimes::PENDING_AUTHORIZATION)
    }
}

impl std::fmt::Debug for PendingAuthorizationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorizationStore").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn pending(state: &str, client_id: &str) -> PendingAuthorization {
        PendingAuthorization {
            state: state.into(),
            client_id: client_id.into(),
            redirect_uri: "http://localhost:3000/callback".into(),
            code_challenge: "challenge".into(),
            code_challenge_method: "S256".into(),
            scope: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_take_and_remove_is_one_time() {
        let store = PendingAuthorizationStore::default();
        store.store(pending("s1", "client1")).await;

        let taken = store.take_and_remove("s1").await.unwrap();
        assert_eq!(taken.client_id, "client1");
        assert!(store.take_and_remove("s1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_state_replaces_entry() {
        let store = PendingAuthorizationStore::default();
        store.store(pending("s1", "first")).await;
        store.store(pending("s1", "second")).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.take_and_remove("s1").await.unwrap().client_id, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pending_is_absent_and_deleted() {
        let store = PendingAuthorizationStore::new(Duration::from_secs(600));
        store.store(pending("s1", "client1")).await;

        tokio::time::advance(Duration::from_secs(601)).await;

        assert!(store.take_and_remove("s1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callbacks_observe_once() {
        let store = Arc::new(PendingAuthorizationStore::default());
        store.store(pending("s1", "client1")).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.take_and_remove("s1").await }));
        }

        let mut observed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                observed += 1;
            }
        }
        assert_eq!(observed, 1);
    }
}
