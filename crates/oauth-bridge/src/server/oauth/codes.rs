//! One-time authorization codes issued to clients after the upstream callback.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::task::JoinHandle;

use super::pkce;
use super::store::{InMemoryStore, KvStore, Take, spawn_sweeper};
use super::types::AuthorizationCodeEntry;
use crate::config::lifetimes;

/// Random bytes per authorization code (32 hex characters).
const CODE_BYTES: usize = 16;

/// Generate a fresh authorization code from the OS CSPRNG.
#[must_use]
pub fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// What the client presents at the token endpoint to redeem a code.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeProof<'a> {
    pub code_verifier: &'a str,
    /// Must equal the redirect URI bound at authorize time when supplied.
    pub redirect_uri: Option<&'a str>,
    /// Must equal the client the code was issued to when supplied.
    pub client_id: Option<&'a str>,
}

impl<'a> ExchangeProof<'a> {
    /// A proof carrying only the PKCE verifier.
    #[must_use]
    pub const fn verifier(code_verifier: &'a str) -> Self {
        Self { code_verifier, redirect_uri: None, client_id: None }
    }

    fn matches(&self, entry: &AuthorizationCodeEntry) -> bool {
        if self.redirect_uri.is_some_and(|uri| uri != entry.redirect_uri) {
            return false;
        }
        if self.client_id.is_some_and(|id| id != entry.client_id) {
            return false;
        }
        entry.code_challenge_method == pkce::S256
            && pkce::verify_s256(self.code_verifier, &entry.code_challenge)
    }
}

/// Binds authorization codes to the upstream identity they were minted for.
pub struct AuthorizationCodeStore {
    codes: Arc<dyn KvStore<AuthorizationCodeEntry>>,
    ttl: Duration,
}

impl AuthorizationCodeStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), ttl)
    }

    /// Use an alternative backing store.
    #[must_use]
    pub fn with_store(codes: Arc<dyn KvStore<AuthorizationCodeEntry>>, ttl: Duration) -> Self {
        Self { codes, ttl }
    }

    /// Store `entry` under `code`.
    pub async fn store(&self, code: &str, entry: AuthorizationCodeEntry) {
        self.codes.set(code.to_owned(), entry, self.ttl).await;
    }

    /// Generate a fresh code for `entry` and store it.
    pub async fn issue(&self, entry: AuthorizationCodeEntry) -> String {
        let code = generate_code();
        tracing::debug!(client_id = %entry.client_id, "Issuing authorization code");
        self.store(&code, entry).await;
        code
    }

    /// Redeem `code`.
    ///
    /// PKCE is checked again here against the challenge bound to the code,
    /// independent of [`pkce::PkceVerifier`]. A mismatch returns `None` and keeps
    /// the code so the legitimate client can retry before it expires; a match
    /// removes it.
    pub async fn exchange(
        &self,
        code: &str,
        proof: &ExchangeProof<'_>,
    ) -> Option<AuthorizationCodeEntry> {
        let accept = |entry: &AuthorizationCodeEntry| proof.matches(entry);

        match self.codes.take_if(code, &accept).await {
            Take::Taken(entry) => Some(entry),
            Take::Rejected => {
                tracing::warn!("Authorization code presented with mismatched proof");
                None
            }
            Take::Missing => None,
        }
    }

    /// Number of outstanding codes, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.codes.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.codes.is_empty().await
    }

    /// Start the background sweep of expired codes.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        spawn_sweeper(&self.codes, "authorization_codes", lifetimes::STORE_SWEEP)
    }
}

impl Default for AuthorizationCodeStore {
    fn default() -> Self {
        Self::new(lifetimes::AUTHORIZATION_CODE)
    }
}

impl std::fmt::Debug for AuthorizationCodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeStore").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::server::oauth::types::{UpstreamTokens, UserInfo};

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn entry() -> AuthorizationCodeEntry {
        AuthorizationCodeEntry {
            upstream: UpstreamTokens {
                access_token: "ya29.upstream".into(),
                refresh_token: Some("1//refresh".into()),
                id_token: None,
                expires_in: Some(3599),
            },
            user: UserInfo {
                user_id: "1234567890".into(),
                email: "alice@company.com".into(),
                name: Some("Alice".into()),
                domain: "company.com".into(),
            },
            client_id: "client1".into(),
            redirect_uri: "http://localhost:3000/callback".into(),
            code_challenge: CHALLENGE.into(),
            code_challenge_method: "S256".into(),
            state: "s1".into(),
            scope: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 32);
        assert!(code.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(code, generate_code());
    }

    #[tokio::test]
    async fn test_exchange_once() {
        let store = AuthorizationCodeStore::default();
        let code = store.issue(entry()).await;

        let redeemed = store.exchange(&code, &ExchangeProof::verifier(VERIFIER)).await;
        assert_eq!(redeemed.unwrap().user.email, "alice@company.com");
        assert!(store.exchange(&code, &ExchangeProof::verifier(VERIFIER)).await.is_none());
    }

    #[tokio::test]
    async fn test_wrong_verifier_keeps_code() {
        let store = AuthorizationCodeStore::default();
        let code = store.issue(entry()).await;

        assert!(store.exchange(&code, &ExchangeProof::verifier("wrong-verifier")).await.is_none());
        assert_eq!(store.len().await, 1);
        assert!(store.exchange(&code, &ExchangeProof::verifier(VERIFIER)).await.is_some());
    }

    #[tokio::test]
    async fn test_redirect_uri_binding() {
        let store = AuthorizationCodeStore::default();
        let code = store.issue(entry()).await;

        let other = ExchangeProof {
            code_verifier: VERIFIER,
            redirect_uri: Some("http://localhost:4000/elsewhere"),
            client_id: None,
        };
        assert!(store.exchange(&code, &other).await.is_none());

        let bound = ExchangeProof {
            code_verifier: VERIFIER,
            redirect_uri: Some("http://localhost:3000/callback"),
            client_id: Some("client1"),
        };
        assert!(store.exchange(&code, &bound).await.is_some());
    }

    #[tokio::test]
    async fn test_client_id_binding() {
        let store = AuthorizationCodeStore::default();
        let code = store.issue(entry()).await;

        let proof = ExchangeProof {
            code_verifier: VERIFIER,
            redirect_uri: None,
            client_id: Some("client2"),
        };
        assert!(store.exchange(&code, &proof).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_code_is_absent_and_deleted() {
        let store = AuthorizationCodeStore::new(Duration::from_secs(300));
        let code = store.issue(entry()).await;

        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(store.exchange(&code, &ExchangeProof::verifier(VERIFIER)).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let store = AuthorizationCodeStore::default();
        assert!(store.exchange("deadbeef", &ExchangeProof::verifier(VERIFIER)).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exchange_succeeds_once() {
        let store = Arc::new(AuthorizationCodeStore::default());
        let code = store.issue(entry()).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store.exchange(&code, &ExchangeProof::verifier(VERIFIER)).await.is_some()
            }));
        }

        let mut redeemed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                redeemed += 1;
            }
        }
        assert_eq!(redeemed, 1);
    }
}
