//! HTTP client construction for upstream calls.
//!
//! Only idempotent reads (JWKS, userinfo) go through the retrying client. The
//! token endpoint POST redeems a one-time upstream code and is sent exactly once.

use std::time::Duration;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::config::lifetimes;

/// Retries for transient failures on idempotent requests.
const MAX_RETRIES: u32 = 2;

/// Build the plain upstream client with the given per-request timeout.
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized.
pub fn base_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(lifetimes::CONNECT_TIMEOUT.min(timeout))
        .user_agent(concat!("oauth-bridge/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Wrap `client` with exponential-backoff retries for transient errors.
#[must_use]
pub fn retrying(client: Client) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(100), Duration::from_secs(2))
        .build_with_max_retries(MAX_RETRIES);

    ClientBuilder::new(client).with(RetryTransientMiddleware::new_with_policy(retry_policy)).build()
}
