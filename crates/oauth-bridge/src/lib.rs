//! OAuth Authorization Bridge
//!
//! An OAuth 2.0 authorization server for public clients (desktop apps, IDE
//! extensions, CLIs) that delegates identity to an upstream OpenID Connect
//! provider and only admits accounts from one company email domain.
//!
//! # Features
//!
//! - **PKCE (S256)**: Authorization codes are bound to a client verifier
//! - **Domain restriction**: Identities outside the company domain are rejected
//! - **Verified identity**: RS256 ID tokens are checked against the upstream JWKS
//! - **Self-contained tokens**: HS256 bearer tokens validate without a lookup
//!
//! # Example
//!
//! ```no_run
//! use oauth_bridge::{config::Config, server::BridgeServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     BridgeServer::new(&config)?.run_http(8000).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::{IdentityProvider, UpstreamClient, UpstreamIdentity};
pub use config::Config;
pub use error::{ConfigError, OAuthError, UpstreamError};
