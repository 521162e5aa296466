//! Configuration for the OAuth bridge server.

use std::time::Duration;

use crate::error::ConfigError;

/// Upstream identity provider defaults (Google).
pub mod google {
    /// Authorization endpoint.
    pub const AUTHORIZATION_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

    /// Token endpoint.
    pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

    /// OpenID userinfo endpoint, used when no ID token is returned.
    pub const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

    /// JSON Web Key Set used to verify ID token signatures.
    pub const JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

    /// Accepted `iss` claim values for ID tokens.
    pub const ISSUERS: &[&str] = &["https://accounts.google.com", "accounts.google.com"];

    /// Scopes requested from the upstream provider.
    pub const SCOPES: &str = "openid email profile";
}

/// Lifetimes and sweep intervals.
pub mod lifetimes {
    use std::time::Duration;

    /// Pending authorization lifetime (10 minutes).
    pub const PENDING_AUTHORIZATION: Duration = Duration::from_secs(600);

    /// PKCE challenge lifetime (10 minutes).
    pub const PKCE_CHALLENGE: Duration = Duration::from_secs(600);

    /// Authorization code lifetime (5 minutes).
    pub const AUTHORIZATION_CODE: Duration = Duration::from_secs(300);

    /// Bearer token lifetime (1 hour).
    pub const BEARER_TOKEN: Duration = Duration::from_secs(3600);

    /// Pending authorization sweep interval.
    pub const PENDING_SWEEP: Duration = Duration::from_secs(60);

    /// PKCE, authorization code and token sweep interval.
    pub const STORE_SWEEP: Duration = Duration::from_secs(300);

    /// Upstream HTTP request timeout.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

    /// Upstream connect timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// JWKS key cache lifetime.
    pub const JWKS_CACHE: Duration = Duration::from_secs(3600);
}

/// Minimum length of the bearer token signing secret, in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Most clients the in-memory registry will hold.
pub const DEFAULT_MAX_REGISTERED_CLIENTS: usize = 1000;

/// Redirect URIs accepted when no explicit allow-list is configured.
///
/// Loopback redirects on any port plus the custom schemes registered by the
/// desktop clients we know about.
pub const DEFAULT_REDIRECT_PATTERNS: &[&str] = &[
    r"^https?://localhost(:\d{1,5})?(/[^\s#]*)?$",
    r"^https?://127\.0\.0\.1(:\d{1,5})?(/[^\s#]*)?$",
    r"^https?://\[::1\](:\d{1,5})?(/[^\s#]*)?$",
    r"^cursor://[^\s#]+$",
    r"^vscode://[^\s#]+$",
    r"^vscode-insiders://[^\s#]+$",
    r"^windsurf://[^\s#]+$",
    r"^claude://[^\s#]+$",
];

/// Upstream OpenID Connect provider settings.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// OAuth client id registered with the upstream provider.
    pub client_id: String,

    /// OAuth client secret registered with the upstream provider.
    pub client_secret: String,

    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub jwks_url: String,

    /// Accepted ID token issuers.
    pub issuers: Vec<String>,

    /// Request timeout for every upstream call.
    pub timeout: Duration,
}

impl UpstreamConfig {
    /// Google endpoints with the given client credentials.
    #[must_use]
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_url: google::AUTHORIZATION_URL.to_string(),
            token_url: google::TOKEN_URL.to_string(),
            userinfo_url: google::USERINFO_URL.to_string(),
            jwks_url: google::JWKS_URL.to_string(),
            issuers: google::ISSUERS.iter().map(|s| (*s).to_string()).collect(),
            timeout: lifetimes::UPSTREAM_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("client_id", &self.client_id)
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("issuers", &self.issuers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Public base URL of this server (used for the upstream callback and metadata).
    pub base_url: String,

    /// Upstream identity provider.
    pub upstream: UpstreamConfig,

    /// Organizational email domain every identity must belong to (optional).
    pub required_domain: Option<String>,

    /// HMAC secret for signing bearer tokens.
    pub signing_secret: Vec<u8>,

    /// Regex allow-list for client redirect URIs.
    pub redirect_patterns: Vec<String>,

    /// Scope reported in token responses when the client did not ask for one.
    pub default_scope: String,

    /// Serve `POST /oauth/register`.
    pub client_registration: bool,

    /// Registrations accepted before the registry refuses new clients.
    pub max_registered_clients: usize,

    pub pending_ttl: Duration,
    pub pkce_ttl: Duration,
    pub code_ttl: Duration,
    pub token_ttl: Duration,
}

impl Config {
    /// Create a configuration with default lifetimes and redirect patterns.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        upstream: UpstreamConfig,
        signing_secret: impl Into<Vec<u8>>,
        required_domain: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upstream,
            required_domain: required_domain.map(|d| d.trim().to_ascii_lowercase()),
            signing_secret: signing_secret.into(),
            redirect_patterns: DEFAULT_REDIRECT_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
            default_scope: google::SCOPES.to_string(),
            client_registration: true,
            max_registered_clients: DEFAULT_MAX_REGISTERED_CLIENTS,
            pending_ttl: lifetimes::PENDING_AUTHORIZATION,
            pkce_ttl: lifetimes::PKCE_CHALLENGE,
            code_ttl: lifetimes::AUTHORIZATION_CODE,
            token_ttl: lifetimes::BEARER_TOKEN,
        }
    }

    /// Create a test configuration pointing every upstream endpoint at a mock server.
    #[must_use]
    pub fn for_testing(upstream_base_url: &str) -> Self {
        let upstream = UpstreamConfig {
            client_id: "test-client-id.apps.example.com".to_string(),
            client_secret: "test-client-secret".to_string(),
            authorization_url: format!("{upstream_base_url}/o/oauth2/v2/auth"),
            token_url: format!("{upstream_base_url}/token"),
            userinfo_url: format!("{upstream_base_url}/userinfo"),
            jwks_url: format!("{upstream_base_url}/certs"),
            issuers: vec![upstream_base_url.to_string()],
            timeout: Duration::from_secs(2),
        };

        Self::new(
            "https://bridge.example.com",
            upstream,
            b"test-signing-secret-that-is-long-enough!".to_vec(),
            Some("company.com".to_string()),
        )
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `BASE_URL`, `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `JWT_SECRET`,
    /// and optionally `COMPANY_DOMAIN`, `ALLOWED_REDIRECT_PATTERNS`,
    /// `UPSTREAM_TIMEOUT_SECS`, `ENABLE_CLIENT_REGISTRATION` and
    /// `MAX_REGISTERED_CLIENTS`.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_base_url(None)
    }

    /// Like [`Config::from_env`], with `base_url` taking precedence over `BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or a value is invalid.
    pub fn from_env_with_base_url(base_url: Option<String>) -> Result<Self, ConfigError> {
        let base_url = match base_url.filter(|b| !b.trim().is_empty()) {
            Some(base_url) => base_url,
            None => required_env("BASE_URL")?,
        };
        let client_id = required_env("GOOGLE_CLIENT_ID")?;
        let client_secret = required_env("GOOGLE_CLIENT_SECRET")?;
        let secret = required_env("JWT_SECRET")?;
        let required_domain =
            std::env::var("COMPANY_DOMAIN").ok().filter(|d| !d.trim().is_empty());

        let mut upstream = UpstreamConfig::google(client_id, client_secret);
        if let Ok(raw) = std::env::var("UPSTREAM_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ConfigError::invalid("UPSTREAM_TIMEOUT_SECS", "must be a whole number of seconds")
            })?;
            upstream.timeout = Duration::from_secs(secs);
        }

        let mut config = Self::new(base_url, upstream, secret.into_bytes(), required_domain);

        if let Ok(raw) = std::env::var("ALLOWED_REDIRECT_PATTERNS") {
            let patterns: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if !patterns.is_empty() {
                config.redirect_patterns = patterns;
            }
        }

        if let Ok(raw) = std::env::var("ENABLE_CLIENT_REGISTRATION") {
            config.client_registration = parse_flag("ENABLE_CLIENT_REGISTRATION", &raw)?;
        }
        if let Ok(raw) = std::env::var("MAX_REGISTERED_CLIENTS") {
            config.max_registered_clients = raw.trim().parse().map_err(|_| {
                ConfigError::invalid("MAX_REGISTERED_CLIENTS", "must be a whole number")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the server relies on at startup.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                min: MIN_SIGNING_SECRET_LEN,
                actual: self.signing_secret.len(),
            });
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::invalid("BASE_URL", "must be an absolute URL"));
        }
        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::invalid("UPSTREAM_TIMEOUT_SECS", "must be greater than zero"));
        }
        Ok(())
    }

    /// The redirect URI registered with the upstream provider.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/oauth/callback", self.base_url)
    }

    /// Check if a company domain restriction is configured.
    #[must_use]
    pub const fn restricts_domain(&self) -> bool {
        self.required_domain.is_some()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("upstream", &self.upstream)
            .field("required_domain", &self.required_domain)
            .field("redirect_patterns", &self.redirect_patterns.len())
            .field("client_registration", &self.client_registration)
            .finish_non_exhaustive()
    }
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(name, "must be true or false")),
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingVar(name))
}
