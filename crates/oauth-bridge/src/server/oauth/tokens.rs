//! Bearer token issuance and validation.
//!
//! Issued tokens are HS256 JWTs and validate without a lookup. Each issuance
//! also records the upstream access token in a stateful map, which serves as
//! the fallback validation path and the revocation target. Revoking only
//! affects that map: a signed token stays valid until it expires.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::store::{InMemoryStore, KvStore, spawn_sweeper};
use super::types::{TokenEntry, UpstreamTokens, UserInfo};
use crate::config::{MIN_SIGNING_SECRET_LEN, lifetimes};
use crate::error::{ConfigError, OAuthError};

/// How long an expired entry stays in the stateful map, so validation can
/// report `expired` rather than `not_found`.
const EXPIRED_RETENTION: Duration = lifetimes::STORE_SWEEP;

/// Claims carried by an issued bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BearerClaims {
    /// Upstream user id.
    pub sub: String,
    pub email: String,
    pub company_domain: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A freshly signed bearer token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: u64,
}

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    Expired,
    NotFound,
    Malformed,
}

impl TokenRejection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::NotFound => "not_found",
            Self::Malformed => "malformed",
        }
    }
}

/// Result of validating a bearer token. Serializes as the validate endpoint's body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TokenRejection>,
}

impl TokenValidation {
    fn accepted(user_id: String, email: String, company_domain: String) -> Self {
        Self {
            valid: true,
            user_id: Some(user_id),
            email: Some(email),
            company_domain: Some(company_domain),
            error: None,
        }
    }

    /// A rejection carrying `reason`.
    #[must_use]
    pub const fn rejected(reason: TokenRejection) -> Self {
        Self { valid: false, user_id: None, email: None, company_domain: None, error: Some(reason) }
    }
}

/// Mints and validates bearer tokens.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    lifetime: Duration,
    entries: Arc<dyn KvStore<TokenEntry>>,
}

impl TokenIssuer {
    /// Create an issuer signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is shorter than 32 bytes.
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        lifetime: Duration,
    ) -> Result<Self, ConfigError> {
        Self::with_store(secret, issuer, lifetime, Arc::new(InMemoryStore::new()))
    }

    /// Create an issuer with an alternative backing store for the stateful map.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is shorter than 32 bytes.
    pub fn with_store(
        secret: &[u8],
        issuer: impl Into<String>,
        lifetime: Duration,
        entries: Arc<dyn KvStore<TokenEntry>>,
    ) -> Result<Self, ConfigError> {
        if secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                min: MIN_SIGNING_SECRET_LEN,
                actual: secret.len(),
            });
        }

        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            lifetime,
            entries,
        })
    }

    /// Sign a bearer token for `user` and record the upstream tokens behind it.
    pub async fn issue(
        &self,
        user: &UserInfo,
        upstream: &UpstreamTokens,
    ) -> Result<IssuedToken, OAuthError> {
        let lifetime = TimeDelta::from_std(self.lifetime)
            .map_err(|_| OAuthError::server("Token lifetime out of range"))?;
        let now = Utc::now();

        let claims = BearerClaims {
            sub: user.user_id.clone(),
            email: user.email.clone(),
            company_domain: user.domain.clone(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            iss: self.issuer.clone(),
        };
        let access_token = self.sign(&claims)?;

        self.entries
            .set(
                upstream.access_token.clone(),
                TokenEntry {
                    access_token: upstream.access_token.clone(),
                    refresh_token: upstream.refresh_token.clone(),
                    user_id: user.user_id.clone(),
                    email: user.email.clone(),
                    company_domain: user.domain.clone(),
                    created_at: now,
                    expires_at: Instant::now() + self.lifetime,
                },
                self.lifetime + EXPIRED_RETENTION,
            )
            .await;

        Ok(IssuedToken { access_token, expires_in: self.lifetime.as_secs() })
    }

    /// Validate a presented token. Never fails; rejections carry a reason.
    pub async fn validate(&self, token: &str) -> TokenValidation {
        let token = token.trim();
        if token.is_empty() {
            return TokenValidation::rejected(TokenRejection::Malformed);
        }

        match decode::<BearerClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                let claims = data.claims;
                return TokenValidation::accepted(claims.sub, claims.email, claims.company_domain);
            }
            Err(err) if matches!(err.kind(), ErrorKind::ExpiredSignature) => {
                return TokenValidation::rejected(TokenRejection::Expired);
            }
            Err(err) => {
                tracing::debug!(error = %err, "Signed token rejected, trying token store");
            }
        }

        match self.entries.get(token).await {
            Some(entry) if entry.expires_at > Instant::now() => {
                TokenValidation::accepted(entry.user_id, entry.email, entry.company_domain)
            }
            Some(_) => {
                self.entries.delete(token).await;
                TokenValidation::rejected(TokenRejection::Expired)
            }
            None if looks_like_jwt(token) => TokenValidation::rejected(TokenRejection::Malformed),
            None => TokenValidation::rejected(TokenRejection::NotFound),
        }
    }

    /// Remove a token from the stateful map. Returns whether it was present.
    pub async fn revoke(&self, token: &str) -> bool {
        self.entries.delete(token.trim()).await
    }

    /// Bearer token lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Start the background sweep of the stateful map.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        spawn_sweeper(&self.entries, "tokens", lifetimes::STORE_SWEEP)
    }

    pub(crate) fn sign(&self, claims: &BearerClaims) -> Result<String, OAuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "Failed to sign bearer token");
            OAuthError::server("Failed to issue token")
        })
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Three non-empty dot-separated segments.
fn looks_like_jwt(token: &str) -> bool {
    let mut parts = token.split('.');
    let shaped = parts.by_ref().take(3).filter(|p| !p.is_empty()).count() == 3;
    shaped && parts.next().is_none()
}
