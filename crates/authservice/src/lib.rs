//! An OpenID Connect authentication filter for external authorization.
//!
//! The filter is invoked once per HTTP request by an outer authorization
//! service. For each request it decides whether to let the request through
//! with identity headers attached, redirect the user agent to the identity
//! provider, complete an authorization-code exchange on the callback path,
//! or log the user out. Collaborators the filter depends on — the HTTP
//! client, the token encryptor, the token-response parser, the session
//! store, and the session-id generator — are capability traits with default
//! implementations, so deployments and tests can substitute their own.

pub mod client;
pub mod config;
pub mod crypto;
pub mod ext_authz;
pub mod http;
pub mod oidc;
pub mod session;

pub use oidc::filter::OidcFilter;
