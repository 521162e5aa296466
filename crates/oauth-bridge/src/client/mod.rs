//! Upstream OpenID Connect client.
//!
//! Provides:
//! - Authorization URL construction (no PKCE upstream; the bridge is a
//!   confidential client there)
//! - Authorization code redemption at the token endpoint
//! - Identity extraction from a verified ID token, falling back to userinfo
//! - Company-domain enforcement

pub mod jwks;
mod middleware;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

pub use jwks::{IdTokenClaims, JwksVerifier};
pub use middleware::{base_client, retrying};

use crate::config::{UpstreamConfig, google};
use crate::error::{UpstreamError, UpstreamResult};
use crate::server::oauth::types::{UpstreamTokens, UserInfo};

/// Identity established by redeeming an upstream authorization code.
#[derive(Debug, Clone)]
pub struct UpstreamIdentity {
    pub tokens: UpstreamTokens,
    pub user: UserInfo,
}

/// The upstream identity provider, as seen by the route handlers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to authenticate, carrying `state` through.
    fn authorization_url(&self, state: &str) -> String;

    /// Redeem an upstream authorization code and establish who the user is.
    ///
    /// The returned identity has already passed the domain restriction.
    async fn exchange_code(&self, code: &str) -> UpstreamResult<UpstreamIdentity>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hd: Option<String>,
}

/// Client for the upstream authorization server.
#[derive(Clone)]
pub struct UpstreamClient {
    /// Plain client for the single-shot token POST.
    http: Client,

    /// Retrying client for idempotent reads.
    reads: ClientWithMiddleware,

    jwks: JwksVerifier,
    config: UpstreamConfig,
    callback_url: String,
    required_domain: Option<String>,
}

impl UpstreamClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(
        config: UpstreamConfig,
        callback_url: impl Into<String>,
        required_domain: Option<String>,
    ) -> reqwest::Result<Self> {
        let http = base_client(config.timeout)?;
        let reads = retrying(http.clone());
        let jwks = JwksVerifier::new(
            reads.clone(),
            config.jwks_url.clone(),
            config.client_id.clone(),
            config.issuers.clone(),
            config.timeout,
        );

        Ok(Self {
            http,
            reads,
            jwks,
            config,
            callback_url: callback_url.into(),
            required_domain: required_domain.map(|d| d.to_ascii_lowercase()),
        })
    }

    async fn redeem(&self, code: &str) -> UpstreamResult<UpstreamTokens> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamError::transport(e, self.config.timeout))?;

        let body = self.read_success(response, "token").await?;
        let tokens: TokenResponse = serde_json::from_str(&body)?;

        Ok(UpstreamTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            expires_in: tokens.expires_in,
        })
    }

    async fn userinfo(&self, access_token: &str) -> UpstreamResult<UserInfoResponse> {
        let response = self
            .reads
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| match e {
                reqwest_middleware::Error::Reqwest(e) => {
                    UpstreamError::transport(e, self.config.timeout)
                }
                other => UpstreamError::Middleware(other),
            })?;

        let body = self.read_success(response, "userinfo").await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn read_success(
        &self,
        response: reqwest::Response,
        endpoint: &'static str,
    ) -> UpstreamResult<String> {
        let status = response.status();
        let body =
            response.text().await.map_err(|e| UpstreamError::transport(e, self.config.timeout))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(UpstreamError::Status { endpoint, status: status.as_u16(), message: body })
        }
    }

    async fn identify(&self, tokens: &UpstreamTokens) -> UpstreamResult<UserInfo> {
        let (sub, email, verified, name, hd) = if let Some(id_token) = &tokens.id_token {
            let claims = self.jwks.verify(id_token).await?;
            (claims.sub, claims.email, claims.email_verified, claims.name, claims.hd)
        } else {
            tracing::debug!("No ID token in upstream response, using userinfo");
            let info = self.userinfo(&tokens.access_token).await?;
            (info.sub, info.email, info.email_verified, info.name, info.hd)
        };

        if verified == Some(false) {
            return Err(UpstreamError::MissingEmail);
        }
        let email = email.filter(|e| !e.trim().is_empty()).ok_or(UpstreamError::MissingEmail)?;
        let domain = enforce_domain(&email, self.required_domain.as_deref())?;
        enforce_hosted_domain(hd.as_deref(), self.required_domain.as_deref())?;

        Ok(UserInfo { user_id: sub, email, name, domain })
    }
}

#[async_trait]
impl IdentityProvider for UpstreamClient {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = match url::Url::parse(&self.config.authorization_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Configured authorization URL is invalid");
                return self.config.authorization_url.clone();
            }
        };

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.callback_url)
                .append_pair("response_type", "code")
                .append_pair("scope", google::SCOPES)
                .append_pair("state", state)
                .append_pair("access_type", "offline")
                .append_pair("prompt", "consent");
            if let Some(domain) = &self.required_domain {
                query.append_pair("hd", domain);
            }
        }

        url.into()
    }

    async fn exchange_code(&self, code: &str) -> UpstreamResult<UpstreamIdentity> {
        let tokens = self.redeem(code).await?;
        let user = self.identify(&tokens).await?;
        tracing::info!(domain = %user.domain, "Upstream identity established");
        Ok(UpstreamIdentity { tokens, user })
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("config", &self.config)
            .field("callback_url", &self.callback_url)
            .field("required_domain", &self.required_domain)
            .finish_non_exhaustive()
    }
}

/// Derive the email's domain and check it against `required`.
///
/// The domain is the lowercased text after the last `@`. With no restriction
/// configured, any well-formed email passes.
///
/// # Errors
///
/// Returns [`UpstreamError::MissingEmail`] for a malformed address and
/// [`UpstreamError::DomainMismatch`] when the domains differ.
pub fn enforce_domain(email: &str, required: Option<&str>) -> UpstreamResult<String> {
    let domain = email
        .rsplit_once('@')
        .map(|(local, domain)| (local.trim(), domain.trim()))
        .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
        .map(|(_, domain)| domain.to_ascii_lowercase())
        .ok_or(UpstreamError::MissingEmail)?;

    match required {
        Some(expected) if !expected.eq_ignore_ascii_case(&domain) => {
            tracing::warn!(
                expected = %expected,
                actual = %domain,
                "Rejected identity outside company domain"
            );
            Err(UpstreamError::DomainMismatch {
                expected: expected.to_ascii_lowercase(),
                actual: domain,
            })
        }
        _ => Ok(domain),
    }
}

/// Check the provider's hosted-domain (`hd`) claim against `required`.
///
/// An absent claim passes; the email domain has already been checked. A
/// claim naming another organization is rejected even when the email
/// domain matched.
///
/// # Errors
///
/// Returns [`UpstreamError::DomainMismatch`] when the claim differs.
pub fn enforce_hosted_domain(hd: Option<&str>, required: Option<&str>) -> UpstreamResult<()> {
    match (hd.map(str::trim), required) {
        (Some(hd), Some(expected)) if !hd.eq_ignore_ascii_case(expected) => {
            tracing::warn!(
                expected = %expected,
                hd = %hd,
                "Rejected identity from other hosted domain"
            );
            Err(UpstreamError::DomainMismatch {
                expected: expected.to_ascii_lowercase(),
                actual: hd.to_ascii_lowercase(),
            })
        }
        _ => Ok(()),
    }
}
