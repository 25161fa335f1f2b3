//! Tokens obtained from the identity provider and the parser that
//! interprets token-endpoint response bodies.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Tokens held for one session.
///
/// The ID token is always present; access and refresh tokens are optional
/// and independent. Expiries are absolute unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
	pub id_token: String,
	pub claims: Map<String, Value>,
	pub id_token_expiry: i64,
	pub access_token: Option<String>,
	pub access_token_expiry: Option<i64>,
	pub refresh_token: Option<String>,
}

impl TokenResponse {
	/// Expired when the ID token is past its `exp`, or when an access-token
	/// expiry was recorded and is past. The access-token check only applies
	/// when the field is present: OAuth does not require `expires_in`.
	pub fn is_expired(&self, now: i64) -> bool {
		if self.id_token_expiry < now {
			return true;
		}
		self.access_token_expiry.is_some_and(|expiry| expiry < now)
	}
}

pub(crate) fn unix_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_secs() as i64)
		.unwrap_or(0)
}

/// Interprets token-endpoint response bodies.
///
/// `parse` handles the authorization-code grant and must reject bodies
/// whose ID token fails audience or nonce binding. `parse_refresh` merges a
/// refresh-grant response into the existing tokens: fields the provider
/// omitted are carried forward, a rotated refresh token replaces the old
/// one, and the refresh grant carries no nonce so none is checked.
/// Signature verification is implementation policy; the default
/// implementation does not verify signatures and relies on the response
/// arriving over the authenticated channel to the token endpoint.
pub trait TokenResponseParser: Send + Sync {
	fn parse(&self, client_id: &str, nonce: &str, body: &str) -> Option<TokenResponse>;
	fn parse_refresh(
		&self,
		existing: &TokenResponse,
		client_id: &str,
		body: &str,
	) -> Option<TokenResponse>;
}

/// RFC 6749 §5.1 token response body.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Debug, Default)]
pub struct JsonTokenResponseParser;

impl JsonTokenResponseParser {
	fn decode_claims(id_token: &str) -> Option<Map<String, Value>> {
		let mut segments = id_token.split('.');
		let (_header, payload) = (segments.next()?, segments.next()?);
		segments.next()?;
		if segments.next().is_some() {
			return None;
		}
		let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
		serde_json::from_slice(&payload).ok()
	}

	fn audience_matches(claims: &Map<String, Value>, client_id: &str) -> bool {
		match claims.get("aud") {
			Some(Value::String(audience)) => audience == client_id,
			Some(Value::Array(audiences)) => audiences
				.iter()
				.any(|audience| audience.as_str() == Some(client_id)),
			_ => false,
		}
	}

	fn checked_claims(id_token: &str, client_id: &str) -> Option<(Map<String, Value>, i64)> {
		let claims = Self::decode_claims(id_token)?;
		if !Self::audience_matches(&claims, client_id) {
			debug!("id token audience does not include the client");
			return None;
		}
		let expiry = claims.get("exp")?.as_i64()?;
		Some((claims, expiry))
	}
}

impl TokenResponseParser for JsonTokenResponseParser {
	fn parse(&self, client_id: &str, nonce: &str, body: &str) -> Option<TokenResponse> {
		let raw: RawTokenResponse = match serde_json::from_str(body) {
			Ok(raw) => raw,
			Err(err) => {
				debug!("token response body is not valid JSON: {err}");
				return None;
			},
		};
		let id_token = raw.id_token?;
		let (claims, id_token_expiry) = Self::checked_claims(&id_token, client_id)?;
		if claims.get("nonce").and_then(Value::as_str) != Some(nonce) {
			debug!("id token nonce does not match the authorization request");
			return None;
		}
		Some(TokenResponse {
			id_token,
			claims,
			id_token_expiry,
			access_token: raw.access_token,
			access_token_expiry: raw.expires_in.map(|seconds| unix_now() + seconds),
			refresh_token: raw.refresh_token,
		})
	}

	fn parse_refresh(
		&self,
		existing: &TokenResponse,
		client_id: &str,
		body: &str,
	) -> Option<TokenResponse> {
		let raw: RawTokenResponse = match serde_json::from_str(body) {
			Ok(raw) => raw,
			Err(err) => {
				debug!("refresh response body is not valid JSON: {err}");
				return None;
			},
		};
		let (id_token, claims, id_token_expiry) = match raw.id_token {
			Some(id_token) => {
				let (claims, expiry) = Self::checked_claims(&id_token, client_id)?;
				(id_token, claims, expiry)
			},
			// Many providers omit the id token on refresh; keep the original.
			None => (
				existing.id_token.clone(),
				existing.claims.clone(),
				existing.id_token_expiry,
			),
		};
		Some(TokenResponse {
			id_token,
			claims,
			id_token_expiry,
			access_token: raw.access_token.or_else(|| existing.access_token.clone()),
			access_token_expiry: raw
				.expires_in
				.map(|seconds| unix_now() + seconds)
				.or(existing.access_token_expiry),
			refresh_token: raw.refresh_token.or_else(|| existing.refresh_token.clone()),
		})
	}
}

#[cfg(test)]
mod tests {
	use jsonwebtoken::{EncodingKey, Header};
	use serde_json::json;

	use super::*;

	const CLIENT_ID: &str = "example-app";

	fn mint_id_token(claims: Value) -> String {
		jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test"))
			.unwrap()
	}

	fn default_id_token(nonce: &str, exp: i64) -> String {
		mint_id_token(json!({
			"sub": "user",
			"aud": CLIENT_ID,
			"nonce": nonce,
			"exp": exp,
		}))
	}

	fn existing_response() -> TokenResponse {
		TokenResponse {
			id_token: "existing.id.token".to_string(),
			claims: Map::new(),
			id_token_expiry: 1_000,
			access_token: Some("existing-access".to_string()),
			access_token_expiry: Some(900),
			refresh_token: Some("existing-refresh".to_string()),
		}
	}

	#[test]
	fn parses_complete_token_response() {
		let id_token = default_id_token("expectednonce", 2_000_000_000);
		let body = json!({
			"id_token": id_token,
			"access_token": "expected_access_token",
			"refresh_token": "expected_refresh_token",
			"expires_in": 3600,
			"token_type": "Bearer",
		})
		.to_string();

		let parsed = JsonTokenResponseParser
			.parse(CLIENT_ID, "expectednonce", &body)
			.unwrap();
		assert_eq!(parsed.id_token, id_token);
		assert_eq!(parsed.id_token_expiry, 2_000_000_000);
		assert_eq!(parsed.access_token.as_deref(), Some("expected_access_token"));
		assert_eq!(parsed.refresh_token.as_deref(), Some("expected_refresh_token"));
		let expiry = parsed.access_token_expiry.unwrap();
		assert!(expiry >= unix_now() + 3590 && expiry <= unix_now() + 3610);
		assert_eq!(parsed.claims.get("sub").and_then(Value::as_str), Some("user"));
	}

	#[test]
	fn tokens_other_than_the_id_token_are_optional() {
		let body = json!({ "id_token": default_id_token("n", 2_000_000_000) }).to_string();
		let parsed = JsonTokenResponseParser.parse(CLIENT_ID, "n", &body).unwrap();
		assert!(parsed.access_token.is_none());
		assert!(parsed.access_token_expiry.is_none());
		assert!(parsed.refresh_token.is_none());
	}

	#[test]
	fn accepts_audience_arrays() {
		let id_token = mint_id_token(json!({
			"aud": ["other-app", CLIENT_ID],
			"nonce": "n",
			"exp": 2_000_000_000,
		}));
		let body = json!({ "id_token": id_token }).to_string();
		assert!(JsonTokenResponseParser.parse(CLIENT_ID, "n", &body).is_some());
	}

	#[test]
	fn rejects_audience_mismatch() {
		let id_token = mint_id_token(json!({
			"aud": "other-app",
			"nonce": "n",
			"exp": 2_000_000_000,
		}));
		let body = json!({ "id_token": id_token }).to_string();
		assert!(JsonTokenResponseParser.parse(CLIENT_ID, "n", &body).is_none());
	}

	#[test]
	fn rejects_nonce_mismatch() {
		let body = json!({ "id_token": default_id_token("othernonce", 2_000_000_000) }).to_string();
		assert!(
			JsonTokenResponseParser
				.parse(CLIENT_ID, "expectednonce", &body)
				.is_none()
		);
	}

	#[test]
	fn rejects_missing_exp_claim() {
		let id_token = mint_id_token(json!({ "aud": CLIENT_ID, "nonce": "n" }));
		let body = json!({ "id_token": id_token }).to_string();
		assert!(JsonTokenResponseParser.parse(CLIENT_ID, "n", &body).is_none());
	}

	#[test]
	fn rejects_missing_id_token_and_malformed_bodies() {
		let parser = JsonTokenResponseParser;
		assert!(parser.parse(CLIENT_ID, "n", r#"{"access_token":"a"}"#).is_none());
		assert!(parser.parse(CLIENT_ID, "n", "not json").is_none());
		assert!(
			parser
				.parse(CLIENT_ID, "n", r#"{"id_token":"not.a-jwt"}"#)
				.is_none()
		);
	}

	#[test]
	fn refresh_merge_carries_forward_omitted_fields() {
		let existing = existing_response();
		let body = json!({ "access_token": "refreshed-access" }).to_string();
		let merged = JsonTokenResponseParser
			.parse_refresh(&existing, CLIENT_ID, &body)
			.unwrap();
		assert_eq!(merged.id_token, existing.id_token);
		assert_eq!(merged.id_token_expiry, existing.id_token_expiry);
		assert_eq!(merged.access_token.as_deref(), Some("refreshed-access"));
		assert_eq!(merged.access_token_expiry, existing.access_token_expiry);
		assert_eq!(merged.refresh_token.as_deref(), Some("existing-refresh"));
	}

	#[test]
	fn refresh_merge_honors_rotation() {
		let existing = existing_response();
		let id_token = mint_id_token(json!({ "aud": CLIENT_ID, "exp": 2_000_000_000 }));
		let body = json!({
			"id_token": id_token,
			"access_token": "refreshed-access",
			"refresh_token": "rotated-refresh",
			"expires_in": 60,
		})
		.to_string();
		let merged = JsonTokenResponseParser
			.parse_refresh(&existing, CLIENT_ID, &body)
			.unwrap();
		assert_eq!(merged.id_token, id_token);
		assert_eq!(merged.id_token_expiry, 2_000_000_000);
		assert_eq!(merged.refresh_token.as_deref(), Some("rotated-refresh"));
		assert!(merged.access_token_expiry.unwrap() >= unix_now() + 50);
	}

	#[test]
	fn refresh_rejects_replacement_id_token_with_wrong_audience() {
		let existing = existing_response();
		let id_token = mint_id_token(json!({ "aud": "other-app", "exp": 2_000_000_000 }));
		let body = json!({ "id_token": id_token }).to_string();
		assert!(
			JsonTokenResponseParser
				.parse_refresh(&existing, CLIENT_ID, &body)
				.is_none()
		);
	}

	#[test]
	fn expiry_checks_only_consider_present_fields() {
		let mut response = existing_response();
		response.id_token_expiry = 2_000_000_000;
		response.access_token_expiry = None;
		assert!(!response.is_expired(1_999_999_999));

		response.access_token_expiry = Some(100);
		assert!(response.is_expired(1_999_999_999));

		response.access_token_expiry = None;
		response.id_token_expiry = 100;
		assert!(response.is_expired(101));
		assert!(!response.is_expired(100));
	}
}
