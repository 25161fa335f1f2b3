//! The two token-endpoint grants the filter performs against the identity
//! provider: authorization-code exchange and refresh.

use std::sync::Arc;

use http::{HeaderMap, HeaderValue, StatusCode, header};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::client::{HttpClient, HttpResponse};
use crate::config::OidcConfig;
use crate::http::{encode_basic_auth, encode_form_data};
use crate::oidc::token_response::{TokenResponse, TokenResponseParser};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, thiserror::Error)]
pub enum TokenExchangeError {
	/// The provider produced no response: connect failure, abort, or
	/// deadline exceeded.
	#[error("identity provider unreachable: {0}")]
	Unreachable(String),
	#[error("identity provider rejected the request: HTTP {0}")]
	Rejected(StatusCode),
	#[error("identity provider returned an unusable token response")]
	InvalidResponse,
}

/// Client side of the token endpoint.
pub struct IdpClient {
	config: Arc<OidcConfig>,
	http: Arc<dyn HttpClient>,
	parser: Arc<dyn TokenResponseParser>,
}

impl IdpClient {
	pub fn new(
		config: Arc<OidcConfig>,
		http: Arc<dyn HttpClient>,
		parser: Arc<dyn TokenResponseParser>,
	) -> Self {
		Self {
			config,
			http,
			parser,
		}
	}

	/// Exchanges an authorization code for tokens (RFC 6749 §4.1.3). The
	/// client authenticates with HTTP Basic credentials; `nonce` is handed
	/// to the parser for the ID-token binding check.
	pub async fn exchange_code(
		&self,
		code: &str,
		nonce: &str,
	) -> Result<TokenResponse, TokenExchangeError> {
		let mut headers = HeaderMap::new();
		headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
		let authorization = encode_basic_auth(
			&self.config.client_id,
			self.config.client_secret.expose_secret(),
		);
		if let Ok(value) = HeaderValue::from_str(&authorization) {
			headers.insert(header::AUTHORIZATION, value);
		}

		let redirect_uri = self.config.callback.to_url();
		let body = encode_form_data([
			("code", code),
			("redirect_uri", redirect_uri.as_str()),
			("grant_type", "authorization_code"),
		]);

		let response = self.post(headers, body).await?;
		if response.status != StatusCode::OK {
			info!(status = %response.status, "token endpoint rejected the code exchange");
			return Err(TokenExchangeError::Rejected(response.status));
		}
		self
			.parser
			.parse(&self.config.client_id, nonce, &response.body)
			.ok_or(TokenExchangeError::InvalidResponse)
	}

	/// Refreshes the session's tokens with the refresh grant
	/// (https://openid.net/specs/openid-connect-core-1_0.html#RefreshTokens).
	/// The merged response carries forward whatever the provider omitted.
	pub async fn refresh_token(
		&self,
		existing: &TokenResponse,
		refresh_token: &str,
	) -> Result<TokenResponse, TokenExchangeError> {
		let mut headers = HeaderMap::new();
		headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));

		let scope = self.config.space_delimited_scopes();
		let body = encode_form_data([
			("client_id", self.config.client_id.as_str()),
			("client_secret", self.config.client_secret.expose_secret()),
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("scope", scope.as_str()),
		]);

		let response = self.post(headers, body).await?;
		if response.status != StatusCode::OK {
			info!(status = %response.status, "token endpoint rejected the refresh");
			return Err(TokenExchangeError::Rejected(response.status));
		}
		self
			.parser
			.parse_refresh(existing, &self.config.client_id, &response.body)
			.ok_or(TokenExchangeError::InvalidResponse)
	}

	async fn post(
		&self,
		headers: HeaderMap,
		body: String,
	) -> Result<HttpResponse, TokenExchangeError> {
		let url = self.config.token.to_url();
		debug!(%url, "posting to token endpoint");
		match tokio::time::timeout(self.config.idp_timeout(), self.http.post(&url, headers, body))
			.await
		{
			Ok(Ok(response)) => Ok(response),
			Ok(Err(err)) => Err(TokenExchangeError::Unreachable(err.to_string())),
			Err(_) => Err(TokenExchangeError::Unreachable("deadline exceeded".to_string())),
		}
	}
}
