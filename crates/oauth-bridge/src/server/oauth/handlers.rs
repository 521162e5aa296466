//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 6749: Authorization Code Grant, bridged to the upstream provider
//! - RFC 7636: PKCE (S256)
//! - RFC 7009: Token Revocation
//! - RFC 7591: Dynamic Client Registration
//! - RFC 8414: OAuth Authorization Server Metadata

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use chrono::Utc;
use serde::Deserialize;

use super::codes::ExchangeProof;
use super::pkce;
use super::tokens::{IssuedToken, TokenRejection, TokenValidation};
use super::types::{AuthorizationCodeEntry, FlowStage, PendingAuthorization};
use crate::error::{OAuthError, OAuthResult};
use crate::server::transport::HttpState;

/// Record a flow stage transition.
fn transition(from: FlowStage, to: FlowStage, client_id: &str) {
    debug_assert!(!from.is_terminal(), "no transitions out of {from}");
    if to == FlowStage::Failed {
        tracing::warn!(from = %from, stage = %to, client_id, "Authorization flow failed");
    } else {
        tracing::info!(from = %from, stage = %to, client_id, "Authorization flow advanced");
    }
}

/// A present, non-blank parameter, returned exactly as sent.
///
/// Values are never trimmed: `state` and `code_challenge` are opaque to this
/// server and must round-trip byte for byte.
fn require<'a>(value: Option<&'a str>, name: &str) -> OAuthResult<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("Missing {name}")))
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// `302` to `base` with `params` appended to its query string.
fn redirect_with(base: &str, params: &[(&str, &str)]) -> OAuthResult<Response> {
    let mut url = url::Url::parse(base).map_err(|e| {
        tracing::error!(error = %e, "Stored redirect URI no longer parses");
        OAuthError::server("Invalid redirect URI")
    })?;

    url.query_pairs_mut().extend_pairs(params);

    Ok(no_store((StatusCode::FOUND, [(header::LOCATION, String::from(url))]).into_response()))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let scopes: Vec<&str> = state.default_scope.split_whitespace().collect();

    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/oauth/authorize", state.base_url),
        "token_endpoint": format!("{}/oauth/token", state.base_url),
        "registration_endpoint": format!("{}/oauth/register", state.base_url),
        "revocation_endpoint": format!("{}/oauth/revoke", state.base_url),
        "scopes_supported": scopes,
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": [pkce::S256]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
}

fn registration_error(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_client_metadata",
            "error_description": description
        })),
    )
        .into_response()
}

/// `POST /oauth/register`
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    request: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Some(registry) = state.clients.as_ref() else {
        return (StatusCode::NOT_FOUND, "Client registration not enabled").into_response();
    };

    let Ok(Json(request)) = request else {
        return registration_error("Request body must be a JSON object");
    };

    let redirect_uris = request.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return registration_error("redirect_uris is required");
    }
    if let Some(rejected) = redirect_uris.iter().find(|uri| !state.redirects.is_allowed(uri)) {
        tracing::warn!(redirect_uri = %rejected, "Registration with disallowed redirect URI");
        return registration_error("redirect_uris contains a URI that is not allowed");
    }

    let client = match registry.register(request.client_name, redirect_uris).await {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "Registration refused");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "temporarily_unavailable",
                    "error_description": "Client registration is at capacity"
                })),
            )
                .into_response();
        }
    };

    tracing::info!(client_id = %client.client_id, "Registered OAuth client");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client.client_id,
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "client_id_issued_at": client.created_at.timestamp(),
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none"
        })),
    )
        .into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /oauth/authorize`
///
/// Validates the client request, records the PKCE challenge and pending
/// authorization under the client's `state`, and sends the browser upstream.
/// Every failure is a `400` JSON body; the client's redirect URI is not yet
/// trusted at this point.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> OAuthResult<Response> {
    let Query(query) =
        query.map_err(|_| OAuthError::invalid_request("Malformed authorization request"))?;

    if query.response_type.as_deref() != Some("code") {
        return Err(OAuthError::invalid_request("response_type must be 'code'"));
    }
    let client_id = require(query.client_id.as_deref(), "client_id")?;
    let oauth_state = require(query.state.as_deref(), "state")?;
    let code_challenge = require(query.code_challenge.as_deref(), "code_challenge")?;
    if query.code_challenge_method.as_deref() != Some(pkce::S256) {
        return Err(OAuthError::invalid_request("code_challenge_method must be 'S256'"));
    }

    let redirect_uri = require(query.redirect_uri.as_deref(), "redirect_uri")?;
    if !state.redirects.is_allowed(redirect_uri) {
        tracing::warn!(client_id, redirect_uri, "Rejected redirect URI");
        return Err(OAuthError::invalid_request("redirect_uri is not allowed"));
    }

    if let Some(registry) = state.clients.as_ref() {
        if let Some(client) = registry.get(client_id).await {
            if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
                return Err(OAuthError::invalid_request(
                    "redirect_uri not registered for this client",
                ));
            }
        }
    }

    state.pkce.store_challenge(oauth_state, code_challenge, pkce::S256).await?;
    state
        .pending
        .store(PendingAuthorization {
            state: oauth_state.to_owned(),
            client_id: client_id.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
            code_challenge: code_challenge.to_owned(),
            code_challenge_method: pkce::S256.to_owned(),
            scope: query.scope.filter(|s| !s.trim().is_empty()),
            created_at: Utc::now(),
        })
        .await;

    transition(FlowStage::NoSession, FlowStage::Pending, client_id);

    let location = state.identity.authorization_url(oauth_state);
    Ok(no_store((StatusCode::FOUND, [(header::LOCATION, location)]).into_response()))
}

// ─── Upstream Callback ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// `GET /oauth/callback`
///
/// Completes the upstream leg. An unknown or expired `state` is answered
/// directly with `400`; once the pending authorization is found, failures are
/// reported to the client's redirect URI.
pub async fn handle_callback(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> OAuthResult<Response> {
    let Query(query) = query.map_err(|_| OAuthError::invalid_request("Malformed callback"))?;
    let oauth_state = require(query.state.as_deref(), "state")?;

    let Some(pending) = state.pending.take_and_remove(oauth_state).await else {
        tracing::warn!("Callback for unknown or expired state");
        return Err(OAuthError::invalid_request("Unknown or expired state"));
    };
    let client_id = pending.client_id.as_str();

    if let Some(upstream_error) = query.error.as_deref() {
        tracing::warn!(client_id, upstream_error, "Upstream denied authorization");
        transition(FlowStage::Pending, FlowStage::Failed, client_id);
        return redirect_with(
            &pending.redirect_uri,
            &[
                ("error", "access_denied"),
                ("error_description", "The identity provider denied the request"),
                ("state", oauth_state),
            ],
        );
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        transition(FlowStage::Pending, FlowStage::Failed, client_id);
        return redirect_with(
            &pending.redirect_uri,
            &[
                ("error", "invalid_request"),
                ("error_description", "Missing authorization code"),
                ("state", oauth_state),
            ],
        );
    };

    let identity = match state.identity.exchange_code(code).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::error!(client_id = %client_id, error = %err, "Upstream code exchange failed");
            transition(FlowStage::Pending, FlowStage::Failed, client_id);
            let err = OAuthError::from(err);
            return redirect_with(
                &pending.redirect_uri,
                &[
                    ("error", err.code()),
                    ("error_description", err.description()),
                    ("state", oauth_state),
                ],
            );
        }
    };
    transition(FlowStage::Pending, FlowStage::UpstreamReturned, client_id);

    let code = state
        .codes
        .issue(AuthorizationCodeEntry {
            upstream: identity.tokens,
            user: identity.user,
            client_id: pending.client_id.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            code_challenge: pending.code_challenge.clone(),
            code_challenge_method: pending.code_challenge_method.clone(),
            state: pending.state.clone(),
            scope: pending.scope.clone(),
            created_at: Utc::now(),
        })
        .await;

    transition(FlowStage::UpstreamReturned, FlowStage::CodeIssued, client_id);

    redirect_with(&pending.redirect_uri, &[("code", code.as_str()), ("state", oauth_state)])
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
}

/// `POST /oauth/token`
///
/// Exchange an authorization code and PKCE verifier for a bearer token.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> OAuthResult<Response> {
    let Form(form) = form.map_err(|_| OAuthError::invalid_request("Malformed token request"))?;

    match require(form.grant_type.as_deref(), "grant_type")? {
        "authorization_code" => {}
        other => {
            tracing::debug!(grant_type = %other, "Unsupported grant type");
            return Err(OAuthError::UnsupportedGrantType);
        }
    }

    let code = require(form.code.as_deref(), "code")?;
    let code_verifier = require(form.code_verifier.as_deref(), "code_verifier")?;
    if !pkce::is_valid_verifier(code_verifier) {
        return Err(OAuthError::invalid_request("code_verifier is malformed"));
    }

    let proof = ExchangeProof {
        code_verifier,
        redirect_uri: form.redirect_uri.as_deref(),
        client_id: form.client_id.as_deref(),
    };
    let Some(entry) = state.codes.exchange(code, &proof).await else {
        return Err(OAuthError::invalid_grant("Invalid authorization code or code verifier"));
    };

    // The code exchange already proved the verifier; this only consumes the record.
    if !state.pkce.verify(&entry.state, code_verifier).await {
        tracing::debug!(client_id = %entry.client_id, "PKCE record already gone at token time");
    }

    let IssuedToken { access_token, expires_in } =
        state.tokens.issue(&entry.user, &entry.upstream).await?;

    transition(FlowStage::CodeIssued, FlowStage::TokenIssued, &entry.client_id);

    let scope = entry.scope.as_deref().unwrap_or(&state.default_scope);
    Ok(no_store(
        Json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "scope": scope
        }))
        .into_response(),
    ))
}

// ─── Token Validation ────────────────────────────────────────────────────────

/// `POST /oauth/token/validate`
///
/// Validate the bearer token presented in the `Authorization` header.
pub async fn handle_validate(
    State(state): State<Arc<HttpState>>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
) -> Response {
    let result = match bearer {
        Ok(TypedHeader(authorization)) => state.tokens.validate(authorization.token()).await,
        Err(_) => TokenValidation::rejected(TokenRejection::Malformed),
    };

    let status = if result.valid { StatusCode::OK } else { StatusCode::UNAUTHORIZED };
    no_store((status, Json(result)).into_response())
}

// ─── RFC 7009: Token Revocation ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
}

/// `POST /oauth/revoke`
///
/// Responds `200` whether or not the token was known.
pub async fn handle_revoke(
    State(state): State<Arc<HttpState>>,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> OAuthResult<StatusCode> {
    let Form(form) = form.map_err(|_| OAuthError::invalid_request("Malformed revocation request"))?;
    let token = require(form.token.as_deref(), "token")?;

    let revoked = state.tokens.revoke(token).await;
    tracing::info!(revoked, "Token revocation requested");

    Ok(StatusCode::OK)
}
