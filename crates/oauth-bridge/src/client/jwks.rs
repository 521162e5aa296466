//! ID token verification against the upstream JSON Web Key Set.

use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::future::Cache;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::config::lifetimes;
use crate::error::{UpstreamError, UpstreamResult};

/// Clock skew tolerated on `exp`/`iat`.
const LEEWAY_SECS: u64 = 60;

/// Maximum number of cached signing keys.
const MAX_KEYS: u64 = 32;

/// Claims read from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    /// Hosted domain, present for Workspace accounts.
    #[serde(default)]
    pub hd: Option<String>,
}

/// Verifies RS256 ID tokens, caching decoding keys by `kid`.
#[derive(Clone)]
pub struct JwksVerifier {
    client: ClientWithMiddleware,
    jwks_url: String,
    keys: Cache<String, DecodingKey>,
    audience: String,
    issuers: Vec<String>,
    timeout: Duration,
}

impl JwksVerifier {
    #[must_use]
    pub fn new(
        client: ClientWithMiddleware,
        jwks_url: impl Into<String>,
        audience: impl Into<String>,
        issuers: Vec<String>,
        timeout: Duration,
    ) -> Self {
        let keys = Cache::builder()
            .max_capacity(MAX_KEYS)
            .time_to_live(lifetimes::JWKS_CACHE)
            .build();

        Self {
            client,
            jwks_url: jwks_url.into(),
            keys,
            audience: audience.into(),
            issuers,
            timeout,
        }
    }

    /// Verify signature, issuer, audience and expiry of `id_token`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::IdToken`] if any check fails, or a transport
    /// error if the key set cannot be fetched.
    pub async fn verify(&self, id_token: &str) -> UpstreamResult<IdTokenClaims> {
        let header = decode_header(id_token)
            .map_err(|e| UpstreamError::id_token(format!("undecodable header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(UpstreamError::id_token(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| UpstreamError::id_token("missing 'kid' header"))?;

        let key = self.key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&self.issuers);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECS;

        decode::<IdTokenClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| UpstreamError::id_token(e.to_string()))
    }

    /// Look up a key by id, refreshing the key set once on a miss.
    async fn key(&self, kid: &str) -> UpstreamResult<DecodingKey> {
        if let Some(key) = self.keys.get(kid).await {
            return Ok(key);
        }

        self.refresh().await?;

        self.keys
            .get(kid)
            .await
            .ok_or_else(|| UpstreamError::id_token(format!("no signing key with kid '{kid}'")))
    }

    async fn refresh(&self) -> UpstreamResult<()> {
        tracing::debug!(url = %self.jwks_url, "Fetching upstream JWKS");

        let response = self.client.get(&self.jwks_url).send().await.map_err(|e| match e {
            reqwest_middleware::Error::Reqwest(e) => UpstreamError::transport(e, self.timeout),
            other => UpstreamError::Middleware(other),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| UpstreamError::transport(e, self.timeout))?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint: "jwks",
                status: status.as_u16(),
                message: body,
            });
        }

        let set: JwkSet = serde_json::from_str(&body)?;
        let mut loaded = 0usize;
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else { continue };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    self.keys.insert(kid, key).await;
                    loaded += 1;
                }
                Err(e) => tracing::warn!(kid = %kid, error = %e, "Skipping unusable JWK"),
            }
        }

        tracing::debug!(count = loaded, "Loaded upstream signing keys");
        Ok(())
    }
}

impl std::fmt::Debug for JwksVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksVerifier")
            .field("jwks_url", &self.jwks_url)
            .field("audience", &self.audience)
            .field("issuers", &self.issuers)
            .finish_non_exhaustive()
    }
}
