//! Session identifiers and the session-id to token-response store.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::oidc::token_response::TokenResponse;

const SESSION_ID_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("session store unavailable: {reason}")]
pub struct SessionStoreError {
	reason: String,
}

impl SessionStoreError {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

/// Maps session ids to the token response obtained for them.
///
/// Implementations are shared across request workers and must tolerate
/// concurrent calls. `set` fully replaces any prior value; `remove` is
/// idempotent, so a logout racing a refresh write-back settles on logged
/// out. Backends that can fail report errors; the filter treats a failed
/// `get` as absence and never fails a request over `set`/`remove` errors.
pub trait SessionStore: Send + Sync {
	fn get(&self, session_id: &str) -> Result<Option<TokenResponse>, SessionStoreError>;
	fn set(&self, session_id: &str, response: TokenResponse) -> Result<(), SessionStoreError>;
	fn remove(&self, session_id: &str) -> Result<(), SessionStoreError>;
}

/// Process-local [`SessionStore`]. Sessions do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
	sessions: Mutex<HashMap<String, TokenResponse>>,
}

impl InMemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl SessionStore for InMemorySessionStore {
	fn get(&self, session_id: &str) -> Result<Option<TokenResponse>, SessionStoreError> {
		Ok(self.sessions.lock().unwrap().get(session_id).cloned())
	}

	fn set(&self, session_id: &str, response: TokenResponse) -> Result<(), SessionStoreError> {
		self
			.sessions
			.lock()
			.unwrap()
			.insert(session_id.to_string(), response);
		Ok(())
	}

	fn remove(&self, session_id: &str) -> Result<(), SessionStoreError> {
		self.sessions.lock().unwrap().remove(session_id);
		Ok(())
	}
}

/// Produces the opaque high-entropy identifiers that bind a browser to a
/// stored session.
pub trait SessionIdGenerator: Send + Sync {
	fn generate(&self) -> String;
}

/// 32 CSPRNG bytes, URL-safe base64 without padding.
#[derive(Debug, Default)]
pub struct RandomSessionIdGenerator;

impl SessionIdGenerator for RandomSessionIdGenerator {
	fn generate(&self) -> String {
		let mut bytes = [0u8; SESSION_ID_BYTES];
		let mut rng = rand::rng();
		rng.fill_bytes(&mut bytes);
		URL_SAFE_NO_PAD.encode(bytes)
	}
}
