//! The OIDC authentication filter and its protocol pieces.

pub mod filter;
pub mod idp;
pub mod state_cookie;
pub mod token_response;
