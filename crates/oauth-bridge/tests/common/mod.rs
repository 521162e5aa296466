//! Shared fixtures: a mock upstream identity provider and router helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::json;
use sha2::{Digest, Sha256};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oauth_bridge::config::Config;
use oauth_bridge::server::transport::{HttpState, router_with_state};

/// Key id of the fixture signing key.
pub const KID: &str = "upstream-test-key";

/// Base64url modulus of `fixtures/upstream_rsa.pem`.
pub const MODULUS: &str = concat!(
    "3c2H56V0x8HLTNi5N7LZTHuJoYipzie6qhwcifgHW5wRpebOF93zzxbnPU2_m_ImZZLaUMfW6OK6v7WEENcSTdQsLH",
    "t54bs0NzgiCkxIg9m19jtnlSVFmFBXdfEzAp6nQYyivOybjAlNpk09SOviaO4vhT2wsWRj6f0B_ZuNVDcR2jIzd7oU",
    "fJXIwfvmTwZEpdtQzgmKO749w4nRSdhFE8CZc3hJl8hyLYR5siGd8NS_I-eQx-jrAHxvOnkp6CssPe3AffApGrqia",
    "H5BMFP-T_nkRtclLIGK2Swx20utZ-IQwl8KQZpA8djtnm1NlezUKWFMWusXo5rx4M4Tab-alw",
);

pub const CLIENT_REDIRECT: &str = "http://localhost:3000/callback";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const UPSTREAM_CODE: &str = "upstream-auth-code";

pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Body of the upstream JWKS endpoint.
pub fn jwks() -> serde_json::Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": KID,
            "n": MODULUS,
            "e": "AQAB"
        }]
    })
}

/// Sign an ID token with the fixture key.
pub fn id_token(issuer: &str, audience: &str, email: &str) -> String {
    sign_id_token(KID, &json!({
        "iss": issuer,
        "aud": audience,
        "sub": "110248495921238986420",
        "email": email,
        "email_verified": true,
        "name": "Test User",
        "iat": Utc::now().timestamp(),
        "exp": Utc::now().timestamp() + 3600
    }))
}

pub fn sign_id_token(kid: &str, claims: &serde_json::Value) -> String {
    let key = EncodingKey::from_rsa_pem(include_bytes!("../fixtures/upstream_rsa.pem")).unwrap();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &key).unwrap()
}

/// A bridge wired to a wiremock upstream.
pub struct TestBridge {
    pub upstream: MockServer,
    pub config: Config,
    pub state: Arc<HttpState>,
    pub router: Router,
}

impl TestBridge {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with the test configuration adjusted by `configure`.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let upstream = MockServer::start().await;
        let mut config = Config::for_testing(&upstream.uri());
        configure(&mut config);
        let state = Arc::new(HttpState::from_config(&config).unwrap());
        let router = router_with_state(Arc::clone(&state));
        Self { upstream, config, state, router }
    }

    /// Upstream token endpoint answering with an ID token for `email`.
    pub async fn mount_identity(&self, email: &str) {
        let token = id_token(&self.upstream.uri(), &self.config.upstream.client_id, email);
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.upstream-access-token",
                "refresh_token": "1//upstream-refresh",
                "id_token": token,
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&self.upstream)
            .await;

        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
            .mount(&self.upstream)
            .await;
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> Response<Body> {
        let body = serde_urlencoded::to_string(form).unwrap();
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// `POST /oauth/register` with a JSON body.
    pub async fn register(&self, body: &serde_json::Value) -> Response<Body> {
        self.send(
            Request::post("/oauth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// `GET /oauth/authorize` for the default client with `state`.
    pub async fn authorize(&self, state: &str) -> Response<Body> {
        let challenge = challenge(VERIFIER);
        let query = serde_urlencoded::to_string([
            ("response_type", "code"),
            ("client_id", "test-client"),
            ("redirect_uri", CLIENT_REDIRECT),
            ("state", state),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ])
        .unwrap();
        self.get(&format!("/oauth/authorize?{query}")).await
    }

    /// `GET /oauth/callback` as the upstream would.
    pub async fn callback(&self, state: &str) -> Response<Body> {
        let query =
            serde_urlencoded::to_string([("code", UPSTREAM_CODE), ("state", state)]).unwrap();
        self.get(&format!("/oauth/callback?{query}")).await
    }

    /// Run authorize and callback, returning the client authorization code.
    pub async fn obtain_code(&self, state: &str) -> String {
        self.authorize(state).await;
        let response = self.callback(state).await;
        let params = location_params(&response);
        params.get("code").cloned().unwrap_or_else(|| panic!("no code in redirect: {params:?}"))
    }

    pub async fn exchange(&self, code: &str, verifier: &str) -> Response<Body> {
        self.post_form(
            "/oauth/token",
            &[("grant_type", "authorization_code"), ("code", code), ("code_verifier", verifier)],
        )
        .await
    }
}

/// The `Location` header of a redirect.
pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

/// Query parameters of the `Location` header.
pub fn location_params(response: &Response<Body>) -> HashMap<String, String> {
    let location = location(response);
    let query = location.split_once('?').map_or("", |(_, q)| q);
    serde_urlencoded::from_str(query).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}
