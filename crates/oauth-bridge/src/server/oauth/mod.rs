//! OAuth 2.0 authorization bridge.
//!
//! Public clients authenticate against this server with PKCE; identity is
//! delegated to the upstream OpenID Connect provider and restricted to the
//! configured company domain.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code Grant
//! - RFC 7636: PKCE (S256)
//! - RFC 7009: Token Revocation
//! - RFC 7591: Dynamic Client Registration
//! - RFC 8414: OAuth Authorization Server Metadata

pub mod clients;
pub mod codes;
pub mod handlers;
pub mod pending;
pub mod pkce;
pub mod redirect;
pub mod store;
pub mod tokens;
pub mod types;

pub use clients::{ClientRegistry, InMemoryClientRegistry};
pub use codes::{AuthorizationCodeStore, ExchangeProof};
pub use pending::PendingAuthorizationStore;
pub use pkce::PkceVerifier;
pub use redirect::RedirectPolicy;
pub use store::{InMemoryStore, KvStore};
pub use tokens::{TokenIssuer, TokenRejection, TokenValidation};
