//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements S256 code challenge verification per RFC 7636. PKCE is a
//! contract between the public client and this server only; nothing here is
//! forwarded upstream.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

use super::store::{InMemoryStore, KvStore, Take, spawn_sweeper};
use super::types::PkceChallenge;
use crate::config::lifetimes;
use crate::error::OAuthError;

/// The only supported challenge method.
pub const S256: &str = "S256";

/// Compute `BASE64URL(SHA256(code_verifier))` without padding.
#[must_use]
pub fn challenge_s256(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored
/// challenge in constant time.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = challenge_s256(code_verifier);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

/// Check RFC 7636 §4.1 verifier syntax: 43-128 characters of `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(code_verifier: &str) -> bool {
    (43..=128).contains(&code_verifier.len())
        && code_verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Stores code challenges by state and verifies presented verifiers once.
pub struct PkceVerifier {
    challenges: Arc<dyn KvStore<PkceChallenge>>,
    ttl: Duration,
}

impl PkceVerifier {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), ttl)
    }

    /// Use an alternative backing store.
    #[must_use]
    pub fn with_store(challenges: Arc<dyn KvStore<PkceChallenge>>, ttl: Duration) -> Self {
        Self { challenges, ttl }
    }

    /// Store the challenge for `state`, replacing any previous one.
    ///
    /// Methods other than `S256` are rejected here rather than at verification.
    pub async fn store_challenge(
        &self,
        state: &str,
        code_challenge: &str,
        code_challenge_method: &str,
    ) -> Result<(), OAuthError> {
        if code_challenge_method != S256 {
            return Err(OAuthError::invalid_request("code_challenge_method must be 'S256'"));
        }
        if code_challenge.is_empty() {
            return Err(OAuthError::invalid_request("code_challenge must not be empty"));
        }

        self.challenges
            .set(
                state.to_owned(),
                PkceChallenge {
                    code_challenge: code_challenge.to_owned(),
                    code_challenge_method: code_challenge_method.to_owned(),
                },
                self.ttl,
            )
            .await;
        Ok(())
    }

    /// Verify `code_verifier` against the challenge stored for `state`.
    ///
    /// Fails closed when there is no live record. A match consumes the record;
    /// a mismatch leaves it in place.
    pub async fn verify(&self, state: &str, code_verifier: &str) -> bool {
        let accept = |record: &PkceChallenge| {
            record.code_challenge_method == S256
                && verify_s256(code_verifier, &record.code_challenge)
        };

        match self.challenges.take_if(state, &accept).await {
            Take::Taken(_) => true,
            Take::Rejected => {
                tracing::debug!("PKCE verifier did not match stored challenge");
                false
            }
            Take::Missing => false,
        }
    }

    /// Start the background sweep of expired challenges.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        spawn_sweeper(&self.challenges, "pkce", lifetimes::STORE_SWEEP)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new(lifetimes::PKCE_CHALLENGE)
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifier").field("ttl", &self.ttl).finish()
    }
}
