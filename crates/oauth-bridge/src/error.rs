//! Error types for the OAuth bridge server.
//!
//! Uses `thiserror` for structured error handling. `OAuthError` is the only
//! type that reaches clients; it renders as an RFC 6749 §5.2 error body and
//! never carries internal detail.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Errors from the upstream identity provider.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// Upstream did not answer within the configured timeout
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success response from an upstream endpoint
    #[error("Upstream {endpoint} endpoint returned {status}: {message}")]
    Status {
        /// Which endpoint answered (token, userinfo, jwks)
        endpoint: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// JSON parsing error
    #[error("Failed to parse upstream response: {0}")]
    Parse(#[from] serde_json::Error),

    /// ID token failed signature, issuer, audience or expiry checks
    #[error("ID token rejected: {0}")]
    IdToken(String),

    /// The identity carries no usable email address
    #[error("Upstream identity has no verified email address")]
    MissingEmail,

    /// The identity's email domain is not the configured company domain
    #[error("Email domain '{actual}' does not match required domain '{expected}'")]
    DomainMismatch {
        /// Configured company domain
        expected: String,
        /// Domain derived from the identity's email
        actual: String,
    },
}

impl UpstreamError {
    /// Classify a reqwest error, separating timeouts from other transport failures.
    #[must_use]
    pub fn transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() { Self::Timeout(timeout) } else { Self::Http(err) }
    }

    /// Create an ID token rejection.
    #[must_use]
    pub fn id_token(message: impl Into<String>) -> Self {
        Self::IdToken(message.into())
    }

    /// Returns true if the identity itself was rejected (retrying will not help).
    #[must_use]
    pub const fn is_identity_rejection(&self) -> bool {
        matches!(self, Self::DomainMismatch { .. } | Self::MissingEmail)
    }
}

/// Protocol-level errors returned to OAuth clients.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// Missing or malformed request parameters
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Code or verifier mismatch, expired or already consumed code
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Grant type other than `authorization_code`
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,

    /// Identity rejected by the company-domain restriction
    #[error("access_denied: {0}")]
    DomainMismatch(String),

    /// Upstream unreachable, malformed response, or internal failure
    #[error("server_error: {0}")]
    Server(String),
}

impl OAuthError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    /// Create an invalid grant error.
    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    /// Create a server error.
    #[must_use]
    pub fn server(description: impl Into<String>) -> Self {
        Self::Server(description.into())
    }

    /// RFC 6749 error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::DomainMismatch(_) => "access_denied",
            Self::Server(_) => "server_error",
        }
    }

    /// Human readable description safe to show to clients.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidGrant(d)
            | Self::DomainMismatch(d)
            | Self::Server(d) => d,
            Self::UnsupportedGrantType => "Only the authorization_code grant is supported",
        }
    }

    /// HTTP status used when the error is rendered as JSON.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::DomainMismatch(_) => StatusCode::FORBIDDEN,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<UpstreamError> for OAuthError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::DomainMismatch { .. } => {
                Self::DomainMismatch("Account is not part of the permitted organization".into())
            }
            UpstreamError::MissingEmail => {
                Self::DomainMismatch("Account has no verified email address".into())
            }
            UpstreamError::Timeout(_) => Self::server("Identity provider did not respond in time"),
            _ => Self::server("Identity provider request failed"),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status(),
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.description()
            })),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

/// Dynamic client registration refusals.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The registry already holds its maximum number of clients
    #[error("Client registry is full ({capacity} clients)")]
    Full {
        /// Configured maximum
        capacity: usize,
    },
}

/// Startup configuration errors.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Missing required environment variable {0}")]
    MissingVar(&'static str),

    /// A value is present but unusable
    #[error("Invalid value for {name}: {message}")]
    Invalid {
        /// Setting name
        name: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Signing secret shorter than the minimum
    #[error("Signing secret must be at least {min} bytes (got {actual})")]
    SecretTooShort {
        /// Required length
        min: usize,
        /// Provided length
        actual: usize,
    },

    /// A redirect pattern failed to compile
    #[error("Invalid redirect pattern: {0}")]
    RedirectPattern(#[from] regex::Error),

    /// The upstream HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    /// Create an invalid value error.
    #[must_use]
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { name, message: message.into() }
    }
}

/// Result type alias for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Result type alias for protocol handlers.
pub type OAuthResult<T> = Result<T, OAuthError>;
