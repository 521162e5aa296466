//! Upstream client tests against a wiremock identity provider.

mod common;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oauth_bridge::client::{IdentityProvider, UpstreamClient};
use oauth_bridge::config::Config;
use oauth_bridge::error::UpstreamError;

use common::{KID, id_token, jwks, sign_id_token};

fn client(server: &MockServer) -> (UpstreamClient, Config) {
    let config = Config::for_testing(&server.uri());
    let client = UpstreamClient::new(
        config.upstream.clone(),
        config.callback_url(),
        config.required_domain.clone(),
    )
    .unwrap();
    (client, config)
}

async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .mount(server)
        .await;
}

async fn mount_token(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_exchange_sends_confidential_client_form() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .and(body_string_contains("client_secret=test-client-secret"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fbridge.example.com%2Foauth%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.a",
            "id_token": id_token(&server.uri(), &config.upstream.client_id, "alice@company.com"),
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = client.exchange_code("the-code").await.unwrap();
    assert_eq!(identity.user.email, "alice@company.com");
    assert_eq!(identity.user.domain, "company.com");
    assert_eq!(identity.user.user_id, "110248495921238986420");
    assert_eq!(identity.user.name.as_deref(), Some("Test User"));
    assert_eq!(identity.tokens.access_token, "ya29.a");
    assert_eq!(identity.tokens.expires_in, Some(3599));
}

#[tokio::test]
async fn test_signing_keys_are_cached() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);

    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .expect(1)
        .mount(&server)
        .await;
    mount_token(
        &server,
        json!({
            "access_token": "ya29.a",
            "id_token": id_token(&server.uri(), &config.upstream.client_id, "alice@company.com")
        }),
    )
    .await;

    client.exchange_code("first").await.unwrap();
    client.exchange_code("second").await.unwrap();
}

#[tokio::test]
async fn test_id_token_for_other_audience_rejected() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);
    mount_jwks(&server).await;
    mount_token(
        &server,
        json!({
            "access_token": "ya29.a",
            "id_token":
                id_token(&server.uri(), "someone-else.apps.example.com", "alice@company.com")
        }),
    )
    .await;

    let err = client.exchange_code("code").await.unwrap_err();
    assert!(matches!(err, UpstreamError::IdToken(_)), "{err:?}");
}

#[tokio::test]
async fn test_id_token_from_other_issuer_rejected() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;
    mount_token(
        &server,
        json!({
            "access_token": "ya29.a",
            "id_token": id_token(
                "https://impostor.example",
                &config.upstream.client_id,
                "alice@company.com"
            )
        }),
    )
    .await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::IdToken(_))));
}

#[tokio::test]
async fn test_unknown_key_id_rejected() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;

    let token = sign_id_token(
        "rotated-away",
        &json!({
            "iss": server.uri(),
            "aud": config.upstream.client_id,
            "sub": "1",
            "email": "alice@company.com",
            "exp": Utc::now().timestamp() + 3600
        }),
    );
    mount_token(&server, json!({"access_token": "ya29.a", "id_token": token})).await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::IdToken(_))));
}

#[tokio::test]
async fn test_expired_id_token_rejected() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;

    let token = sign_id_token(
        KID,
        &json!({
            "iss": server.uri(),
            "aud": config.upstream.client_id,
            "sub": "1",
            "email": "alice@company.com",
            "exp": Utc::now().timestamp() - 3600
        }),
    );
    mount_token(&server, json!({"access_token": "ya29.a", "id_token": token})).await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::IdToken(_))));
}

#[tokio::test]
async fn test_userinfo_fallback_without_id_token() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);
    mount_token(&server, json!({"access_token": "ya29.no-id-token"})).await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer ya29.no-id-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "42",
            "email": "Bob@Company.com",
            "email_verified": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = client.exchange_code("code").await.unwrap();
    assert_eq!(identity.user.user_id, "42");
    assert_eq!(identity.user.domain, "company.com");
}

#[tokio::test]
async fn test_unverified_email_rejected() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);
    mount_token(&server, json!({"access_token": "ya29.a"})).await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "42",
            "email": "bob@company.com",
            "email_verified": false
        })))
        .mount(&server)
        .await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::MissingEmail)));
}

#[tokio::test]
async fn test_missing_email_rejected() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);
    mount_token(&server, json!({"access_token": "ya29.a"})).await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "42"})))
        .mount(&server)
        .await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::MissingEmail)));
}

#[tokio::test]
async fn test_domain_mismatch() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;
    mount_token(
        &server,
        json!({
            "access_token": "ya29.a",
            "id_token": id_token(&server.uri(), &config.upstream.client_id, "user@wrong.com")
        }),
    )
    .await;

    let err = client.exchange_code("code").await.unwrap_err();
    assert!(err.is_identity_rejection());
    assert!(matches!(err, UpstreamError::DomainMismatch { .. }));
}

#[tokio::test]
async fn test_hosted_domain_claim_must_match() {
    let server = MockServer::start().await;
    let (client, config) = client(&server);
    mount_jwks(&server).await;

    let token = sign_id_token(
        KID,
        &json!({
            "iss": server.uri(),
            "aud": config.upstream.client_id,
            "sub": "7",
            "email": "alice@company.com",
            "email_verified": true,
            "hd": "other.com",
            "exp": Utc::now().timestamp() + 3600
        }),
    );
    mount_token(&server, json!({"access_token": "ya29.a", "id_token": token})).await;

    let err = client.exchange_code("code").await.unwrap_err();
    assert!(
        matches!(err, UpstreamError::DomainMismatch { ref actual, .. } if actual == "other.com"),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_token_endpoint_error_status() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client.exchange_code("used-code").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { endpoint: "token", status: 400, .. }));
}

#[tokio::test]
async fn test_token_endpoint_is_not_retried() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.exchange_code("code").await.is_err());
}

#[tokio::test]
async fn test_upstream_timeout() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let err = client.exchange_code("code").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn test_malformed_token_response() {
    let server = MockServer::start().await;
    let (client, _) = client(&server);

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    assert!(matches!(client.exchange_code("code").await, Err(UpstreamError::Parse(_))));
}
