//! The per-request authentication state machine.
//!
//! Each check request is classified exactly once — logout, pass-through,
//! new session, callback, or established session — and the first matching
//! classification determines the outcome. The filter holds its
//! collaborators by shared ownership; none of them reference it back.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::{HeaderMap, header};
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::client::HttpClient;
use crate::config::{LogoutConfig, OidcConfig};
use crate::crypto::TokenEncryptor;
use crate::ext_authz::{
	CheckRequest, CheckResponse, Code, DeniedResponse, HttpAttributes, OkResponse,
};
use crate::http::{
	QueryData, decode_cookies, decode_path, decode_query_data, encode_query_data,
	encode_set_cookie,
};
use crate::oidc::idp::{IdpClient, TokenExchangeError};
use crate::oidc::state_cookie;
use crate::oidc::token_response::{TokenResponse, TokenResponseParser, unix_now};
use crate::session::{SessionIdGenerator, SessionStore};

const COOKIE_DELETED_VALUE: &str = "deleted";
const STATE_TOKEN_BYTES: usize = 32;

/// What a request turned out to be, in evaluation order. Classification is
/// total: the first matching variant wins and later rules never run.
enum RequestClass<'a> {
	Logout(&'a LogoutConfig),
	PassThrough,
	NewSession,
	Callback { session_id: String },
	Session { session_id: String },
}

pub struct OidcFilter {
	config: Arc<OidcConfig>,
	cryptor: Arc<dyn TokenEncryptor>,
	session_ids: Arc<dyn SessionIdGenerator>,
	session_store: Arc<dyn SessionStore>,
	idp: IdpClient,
}

impl OidcFilter {
	pub fn new(
		config: Arc<OidcConfig>,
		http: Arc<dyn HttpClient>,
		parser: Arc<dyn TokenResponseParser>,
		cryptor: Arc<dyn TokenEncryptor>,
		session_ids: Arc<dyn SessionIdGenerator>,
		session_store: Arc<dyn SessionStore>,
	) -> anyhow::Result<Self> {
		config.validate()?;
		let idp = IdpClient::new(config.clone(), http, parser);
		Ok(Self {
			config,
			cryptor,
			session_ids,
			session_store,
			idp,
		})
	}

	/// Runs the check. Never fails toward the caller: every failure mode
	/// maps to a status code with a matching denied response.
	pub async fn process(&self, request: &CheckRequest) -> CheckResponse {
		if let (Some(source), Some(destination)) = (&request.source, &request.destination) {
			debug!(
				"check from {}@{} to {}@{}",
				source.principal, source.address, destination.principal, destination.address
			);
		}

		let Some(http_attributes) = &request.http else {
			info!("check request is missing its http attributes");
			return self.deny_invalid_argument();
		};

		if self.config.require_https && http_attributes.scheme != "https" {
			info!(
				scheme = %http_attributes.scheme,
				"rejecting request with non-https scheme"
			);
			return self.deny_invalid_argument();
		}

		let session_id = self.session_id_from_cookie(&http_attributes.headers);

		match self.classify(http_attributes, session_id.as_deref()) {
			RequestClass::Logout(logout) => self.handle_logout(logout, session_id.as_deref()),
			RequestClass::PassThrough => {
				// Downstream validation is the downstream's responsibility.
				debug!("id token header already present, continuing");
				CheckResponse::ok(OkResponse::new())
			},
			RequestClass::NewSession => self.handle_new_session(),
			RequestClass::Callback { session_id } => {
				self.handle_callback(http_attributes, &session_id).await
			},
			RequestClass::Session { session_id } => self.handle_session(&session_id).await,
		}
	}

	fn classify<'a>(
		&'a self,
		http_attributes: &HttpAttributes,
		session_id: Option<&str>,
	) -> RequestClass<'a> {
		if let Some(logout) = &self.config.logout
			&& decode_path(&http_attributes.path).0 == logout.path
		{
			return RequestClass::Logout(logout);
		}
		if http_attributes
			.headers
			.contains_key(self.config.id_token.header.as_str())
		{
			return RequestClass::PassThrough;
		}
		let Some(session_id) = session_id else {
			return RequestClass::NewSession;
		};
		if self.matches_callback(http_attributes) {
			return RequestClass::Callback {
				session_id: session_id.to_string(),
			};
		}
		RequestClass::Session {
			session_id: session_id.to_string(),
		}
	}

	/// The callback matches on path plus host. The host side accepts the
	/// bare hostname when the configured port is the default for the
	/// configured scheme, mirroring how redirect URLs are rendered.
	fn matches_callback(&self, http_attributes: &HttpAttributes) -> bool {
		let (path, _query) = decode_path(&http_attributes.path);
		let callback = &self.config.callback;
		if path != callback.path {
			return false;
		}
		http_attributes.host == callback.host_with_port()
			|| (callback.is_default_port() && http_attributes.host == callback.hostname)
	}

	fn handle_logout(&self, logout: &LogoutConfig, session_id: Option<&str>) -> CheckResponse {
		if let Some(session_id) = session_id
			&& let Err(err) = self.session_store.remove(session_id)
		{
			warn!("failed to remove session on logout: {err}");
		}
		let mut denied = DeniedResponse::redirect(&logout.redirect_to_uri);
		denied.add_no_cache_headers();
		self.delete_cookie(&mut denied, &self.state_cookie_name());
		self.delete_cookie(&mut denied, &self.session_id_cookie_name());
		info!("logged out, redirecting to {}", logout.redirect_to_uri);
		CheckResponse::denied(Code::Unauthenticated, denied)
	}

	fn handle_new_session(&self) -> CheckResponse {
		let session_id = self.session_ids.generate();
		match self.build_idp_redirect() {
			Ok(mut denied) => {
				// Session-lifetime cookie: no Max-Age.
				self.set_cookie(&mut denied, &self.session_id_cookie_name(), &session_id, None);
				CheckResponse::denied(Code::Unauthenticated, denied)
			},
			Err(denied) => CheckResponse::denied(Code::Internal, denied),
		}
	}

	async fn handle_session(&self, session_id: &str) -> CheckResponse {
		let token_response = match self.session_store.get(session_id) {
			Ok(stored) => stored,
			Err(err) => {
				warn!("session lookup failed, treating session as absent: {err}");
				None
			},
		};
		let Some(token_response) = token_response else {
			info!("no tokens stored for session, redirecting to authenticate");
			return self.redirect_to_idp();
		};
		if self.config.access_token.is_some() && token_response.access_token.is_none() {
			info!("stored tokens lack the required access token, redirecting to authenticate");
			return self.redirect_to_idp();
		}

		if !token_response.is_expired(unix_now()) {
			return self.allow_with_tokens(&token_response);
		}

		let Some(refresh_token) = token_response.refresh_token.clone() else {
			info!("session tokens expired with no refresh token, redirecting to authenticate");
			return self.redirect_to_idp();
		};

		debug!("session tokens expired, refreshing");
		match self.idp.refresh_token(&token_response, &refresh_token).await {
			Ok(refreshed) => {
				if let Err(err) = self.session_store.set(session_id, refreshed.clone()) {
					warn!("failed to store refreshed tokens: {err}");
				}
				self.allow_with_tokens(&refreshed)
			},
			Err(err) => {
				info!("token refresh failed, evicting session: {err}");
				if let Err(remove_err) = self.session_store.remove(session_id) {
					warn!("failed to evict session after refresh failure: {remove_err}");
				}
				self.redirect_to_idp()
			},
		}
	}

	/// Callback handling. Every outcome deletes the state cookie and
	/// carries no-cache headers; failures return an error code instead of
	/// re-redirecting so a broken handshake cannot loop.
	async fn handle_callback(
		&self,
		http_attributes: &HttpAttributes,
		session_id: &str,
	) -> CheckResponse {
		let mut denied = DeniedResponse::new();
		denied.add_no_cache_headers();
		// Best effort at deleting the state cookie for all cases.
		self.delete_cookie(&mut denied, &self.state_cookie_name());

		let Some(encrypted_state_cookie) =
			self.cookie_value(&http_attributes.headers, &self.state_cookie_name())
		else {
			info!("callback request is missing the state cookie");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		};
		let state_cookie = match self.cryptor.decrypt(&encrypted_state_cookie) {
			Ok(plaintext) => plaintext,
			Err(err) => {
				info!("state cookie did not decrypt: {err}");
				return CheckResponse::denied(Code::InvalidArgument, denied);
			},
		};
		let Some((expected_state, nonce)) = state_cookie::decode(&state_cookie) else {
			info!("state cookie payload has an invalid encoding");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		};

		let (_path, query) = decode_path(&http_attributes.path);
		let Some(query_data) = decode_query_data(query) else {
			info!("callback query string is malformed");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		};
		let (Some(state), Some(code)) = (
			first_query_value(&query_data, "state"),
			first_query_value(&query_data, "code"),
		) else {
			info!("callback query is missing the state or code parameter");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		};
		if !constant_time_eq(state, &expected_state) {
			info!("callback state does not match the state cookie");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		}

		let token_response = match self.idp.exchange_code(code, &nonce).await {
			Ok(token_response) => token_response,
			Err(err @ TokenExchangeError::Unreachable(_)) => {
				info!("code exchange failed: {err}");
				return CheckResponse::denied(Code::Internal, denied);
			},
			Err(err @ TokenExchangeError::Rejected(_)) => {
				info!("code exchange failed: {err}");
				return CheckResponse::denied(Code::Unknown, denied);
			},
			Err(err @ TokenExchangeError::InvalidResponse) => {
				info!("code exchange failed: {err}");
				return CheckResponse::denied(Code::InvalidArgument, denied);
			},
		};

		if self.config.access_token.is_some() && token_response.access_token.is_none() {
			info!("token response is missing the required access token");
			return CheckResponse::denied(Code::InvalidArgument, denied);
		}

		if let Err(err) = self.session_store.set(session_id, token_response) {
			// The next request will find no session and re-authenticate.
			warn!("failed to store session tokens: {err}");
		}

		denied.set_redirect(&self.config.landing_page);
		CheckResponse::denied(Code::Unauthenticated, denied)
	}

	fn allow_with_tokens(&self, token_response: &TokenResponse) -> CheckResponse {
		let mut ok = OkResponse::new();
		ok.add_header(
			&self.config.id_token.header,
			&self.config.id_token.encode_value(&token_response.id_token),
		);
		if let (Some(access_token_config), Some(access_token)) =
			(&self.config.access_token, &token_response.access_token)
		{
			ok.add_header(
				&access_token_config.header,
				&access_token_config.encode_value(access_token),
			);
		}
		CheckResponse::ok(ok)
	}

	fn redirect_to_idp(&self) -> CheckResponse {
		match self.build_idp_redirect() {
			Ok(denied) => CheckResponse::denied(Code::Unauthenticated, denied),
			Err(denied) => CheckResponse::denied(Code::Internal, denied),
		}
	}

	/// Builds the 302 to the authorization endpoint along with the
	/// encrypted state cookie binding this redirect to its callback.
	fn build_idp_redirect(&self) -> Result<DeniedResponse, DeniedResponse> {
		let state = random_url_safe_token();
		let nonce = random_url_safe_token();

		let scopes = self.config.space_delimited_scopes();
		let callback = self.config.callback.to_url();
		let query = encode_query_data([
			("response_type", "code"),
			("scope", scopes.as_str()),
			("client_id", self.config.client_id.as_str()),
			("nonce", nonce.as_str()),
			("state", state.as_str()),
			("redirect_uri", callback.as_str()),
		]);
		let location = format!("{}?{}", self.config.authorization.to_url(), query);

		let encrypted = match self.cryptor.encrypt(&state_cookie::encode(&state, &nonce)) {
			Ok(encrypted) => encrypted,
			Err(err) => {
				// Without the state cookie the handshake cannot complete, so
				// withholding the redirect beats stranding the user agent.
				warn!("failed to encrypt state cookie: {err}");
				let mut denied = DeniedResponse::new();
				denied.add_no_cache_headers();
				return Err(denied);
			},
		};

		let mut denied = DeniedResponse::redirect(&location);
		denied.add_no_cache_headers();
		self.set_cookie(
			&mut denied,
			&self.state_cookie_name(),
			&encrypted,
			Some(self.config.timeout),
		);
		debug!("redirecting to the identity provider");
		Ok(denied)
	}

	fn session_id_from_cookie(&self, headers: &HeaderMap) -> Option<String> {
		let name = self.session_id_cookie_name();
		match self.cookie_value(headers, &name) {
			Some(session_id) => Some(session_id),
			None => {
				info!(cookie = %name, "session id cookie missing");
				None
			},
		}
	}

	fn cookie_value(&self, headers: &HeaderMap, name: &str) -> Option<String> {
		let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
		decode_cookies(cookie_header)?.remove(name)
	}

	fn cookie_name(&self, kind: &str) -> String {
		if self.config.cookie_name_prefix.is_empty() {
			format!("__Host-authservice-{kind}-cookie")
		} else {
			format!(
				"__Host-{}-authservice-{kind}-cookie",
				self.config.cookie_name_prefix
			)
		}
	}

	fn state_cookie_name(&self) -> String {
		self.cookie_name("state")
	}

	fn session_id_cookie_name(&self) -> String {
		self.cookie_name("session-id")
	}

	fn set_cookie(&self, denied: &mut DeniedResponse, name: &str, value: &str, max_age: Option<i64>) {
		let directives = cookie_directives(max_age);
		denied.add_header(header::SET_COOKIE, &encode_set_cookie(name, value, &directives));
	}

	fn delete_cookie(&self, denied: &mut DeniedResponse, name: &str) {
		self.set_cookie(denied, name, COOKIE_DELETED_VALUE, Some(0));
	}

	fn deny_invalid_argument(&self) -> CheckResponse {
		let mut denied = DeniedResponse::new();
		denied.add_no_cache_headers();
		CheckResponse::denied(Code::InvalidArgument, denied)
	}
}

/// Directives every authentication cookie carries; `Max-Age` only when a
/// timeout applies.
fn cookie_directives(max_age: Option<i64>) -> BTreeSet<String> {
	let mut directives = BTreeSet::from([
		"HttpOnly".to_string(),
		"Path=/".to_string(),
		"SameSite=Lax".to_string(),
		"Secure".to_string(),
	]);
	if let Some(seconds) = max_age {
		directives.insert(format!("Max-Age={seconds}"));
	}
	directives
}

fn first_query_value<'a>(query: &'a QueryData, key: &str) -> Option<&'a str> {
	query.get(key)?.first().map(String::as_str)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
	aws_lc_rs::constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

fn random_url_safe_token() -> String {
	let mut bytes = [0u8; STATE_TOKEN_BYTES];
	let mut rng = rand::rng();
	rng.fill_bytes(&mut bytes);
	URL_SAFE_NO_PAD.encode(bytes)
}
