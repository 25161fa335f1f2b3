//! HTTP capability the filter needs from the outside world: POST a form
//! body to the identity provider and read back the whole response.

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};

/// The upstream produced no usable response (connect failure, timeout,
/// aborted stream).
#[derive(Debug, thiserror::Error)]
#[error("upstream request failed: {reason}")]
pub struct HttpClientError {
	reason: String,
}

impl HttpClientError {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: StatusCode,
	pub body: String,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
	async fn post(
		&self,
		url: &str,
		headers: HeaderMap,
		body: String,
	) -> Result<HttpResponse, HttpClientError>;
}

/// Default [`HttpClient`] backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
	inner: reqwest::Client,
}

impl ReqwestHttpClient {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
	async fn post(
		&self,
		url: &str,
		headers: HeaderMap,
		body: String,
	) -> Result<HttpResponse, HttpClientError> {
		let response = self
			.inner
			.post(url)
			.headers(headers)
			.body(body)
			.send()
			.await
			.map_err(|err| HttpClientError::new(err.to_string()))?;
		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|err| HttpClientError::new(err.to_string()))?;
		Ok(HttpResponse { status, body })
	}
}

#[cfg(test)]
mod tests {
	use http::header;
	use wiremock::matchers::{body_string, header as header_matcher, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	#[tokio::test]
	async fn post_sends_headers_and_body() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/token"))
			.and(header_matcher("content-type", "application/x-www-form-urlencoded"))
			.and(body_string("grant_type=authorization_code"))
			.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
			.expect(1)
			.mount(&server)
			.await;

		let mut headers = HeaderMap::new();
		headers.insert(
			header::CONTENT_TYPE,
			"application/x-www-form-urlencoded".parse().unwrap(),
		);
		let client = ReqwestHttpClient::new();
		let response = client
			.post(
				&format!("{}/token", server.uri()),
				headers,
				"grant_type=authorization_code".to_string(),
			)
			.await
			.unwrap();
		assert_eq!(response.status, StatusCode::OK);
		assert_eq!(response.body, "ok");
	}

	#[tokio::test]
	async fn connect_failure_surfaces_as_error() {
		let client = ReqwestHttpClient::new();
		let result = client
			.post("http://127.0.0.1:1/token", HeaderMap::new(), String::new())
			.await;
		assert!(result.is_err());
	}
}
