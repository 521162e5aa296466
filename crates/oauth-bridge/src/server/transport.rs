//! HTTP transport: shared state and the axum router.

use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::oauth::{
    AuthorizationCodeStore, ClientRegistry, InMemoryClientRegistry, PendingAuthorizationStore,
    PkceVerifier, RedirectPolicy, TokenIssuer, handlers,
};
use crate::client::{IdentityProvider, UpstreamClient};
use crate::config::Config;
use crate::error::ConfigError;

/// Shared state for HTTP handlers.
pub struct HttpState {
    /// Public base URL, used as token issuer and in metadata.
    pub base_url: String,
    pub identity: Arc<dyn IdentityProvider>,
    pub pkce: PkceVerifier,
    pub pending: PendingAuthorizationStore,
    pub codes: AuthorizationCodeStore,
    pub tokens: TokenIssuer,
    pub redirects: RedirectPolicy,
    /// Dynamic client registration; `None` disables it.
    pub clients: Option<Arc<dyn ClientRegistry>>,
    pub default_scope: String,
}

impl HttpState {
    /// Build state backed by the real upstream client.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let upstream = UpstreamClient::new(
            config.upstream.clone(),
            config.callback_url(),
            config.required_domain.clone(),
        )?;
        Self::with_identity(config, Arc::new(upstream))
    }

    /// Build state around an arbitrary identity provider.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn with_identity(
        config: &Config,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            identity,
            pkce: PkceVerifier::new(config.pkce_ttl),
            pending: PendingAuthorizationStore::new(config.pending_ttl),
            codes: AuthorizationCodeStore::new(config.code_ttl),
            tokens: TokenIssuer::new(&config.signing_secret, &config.base_url, config.token_ttl)?,
            redirects: RedirectPolicy::new(config.redirect_patterns.as_slice())?,
            clients: config.client_registration.then(|| {
                Arc::new(InMemoryClientRegistry::with_capacity(config.max_registered_clients))
                    as Arc<dyn ClientRegistry>
            }),
            default_scope: config.default_scope.clone(),
        })
    }

    /// Start the background sweeps of every store.
    pub fn start_cleanup_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.pending.start_cleanup_task(),
            self.pkce.start_cleanup_task(),
            self.codes.start_cleanup_task(),
            self.tokens.start_cleanup_task(),
        ]
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("base_url", &self.base_url)
            .field("registration", &self.clients.is_some())
            .finish_non_exhaustive()
    }
}

/// Build the router around existing state.
pub fn router_with_state(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        .route("/oauth/authorize", get(handlers::handle_authorize))
        .route("/oauth/callback", get(handlers::handle_callback))
        .route("/oauth/token", post(handlers::handle_token))
        .route("/oauth/token/validate", post(handlers::handle_validate))
        .route("/oauth/revoke", post(handlers::handle_revoke))
        .route("/oauth/register", post(handlers::handle_register))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oauth-bridge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
