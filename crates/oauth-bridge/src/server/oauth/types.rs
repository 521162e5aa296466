//! OAuth 2.0 types for the authorization bridge.
//!
//! Expiry is generally not stored here: records live inside the store's
//! [`Expiring`](super::store::Expiring) wrapper. [`TokenEntry`] is the
//! exception.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// An in-flight authorization request, waiting for the upstream callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    /// Scope requested by the client, echoed in the token response.
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored PKCE challenge, keyed by state.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// Tokens returned by the upstream provider's token endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Identity extracted from a verified upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Stable upstream subject identifier.
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    /// Lowercased part of the email after `@`.
    pub domain: String,
}

/// A one-time authorization code binding, created after domain validation.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeEntry {
    pub upstream: UpstreamTokens,
    pub user: UserInfo,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: String,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stateful record of an issued token, keyed by the upstream access token.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub email: String,
    pub company_domain: String,
    pub created_at: DateTime<Utc>,
    /// Checked on the stateful validation path; the store keeps the entry a
    /// little longer so an expired token can be reported as such.
    pub expires_at: Instant,
}

/// A client registered through dynamic client registration.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Position of a single authorization flow in the protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    NoSession,
    Pending,
    UpstreamReturned,
    CodeIssued,
    TokenIssued,
    Failed,
}

impl FlowStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Pending => "pending",
            Self::UpstreamReturned => "upstream_returned",
            Self::CodeIssued => "code_issued",
            Self::TokenIssued => "token_issued",
            Self::Failed => "failed",
        }
    }

    /// Terminal stages accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TokenIssued | Self::Failed)
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
