//! Request and response model for the external-authorization check call.

use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};

/// gRPC-style status code returned alongside every check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
	Ok,
	Unauthenticated,
	InvalidArgument,
	Internal,
	Unknown,
}

/// Workload identity on one side of the checked connection.
#[derive(Debug, Clone, Default)]
pub struct Peer {
	pub principal: String,
	pub address: String,
}

/// The HTTP sub-message of a check request. Header lookup is
/// case-insensitive by virtue of `HeaderMap`.
#[derive(Debug, Clone, Default)]
pub struct HttpAttributes {
	pub method: String,
	pub scheme: String,
	pub host: String,
	pub path: String,
	pub headers: HeaderMap,
}

#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
	pub source: Option<Peer>,
	pub destination: Option<Peer>,
	pub http: Option<HttpAttributes>,
}

/// Headers to add to the forwarded request when the check passes.
#[derive(Debug, Default)]
pub struct OkResponse {
	pub headers: HeaderMap,
}

impl OkResponse {
	pub fn new() -> Self {
		Self::default()
	}

	/// Header names come from configuration; a name or value that does not
	/// parse is dropped rather than poisoning the whole response.
	pub fn add_header(&mut self, name: &str, value: &str) {
		if let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			self.headers.append(name, value);
		}
	}
}

/// Direct response returned to the user agent when the check does not pass.
#[derive(Debug)]
pub struct DeniedResponse {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Option<String>,
}

impl Default for DeniedResponse {
	fn default() -> Self {
		Self::new()
	}
}

impl DeniedResponse {
	pub fn new() -> Self {
		Self {
			status: StatusCode::FORBIDDEN,
			headers: HeaderMap::new(),
			body: None,
		}
	}

	pub fn redirect(location: &str) -> Self {
		let mut denied = Self::new();
		denied.set_redirect(location);
		denied
	}

	/// Turns the response into a `302 Found` pointing at `location`.
	pub fn set_redirect(&mut self, location: &str) {
		self.status = StatusCode::FOUND;
		self.add_header(header::LOCATION, location);
	}

	/// Denied responses must never be cached by intermediaries.
	pub fn add_no_cache_headers(&mut self) {
		self.add_header(header::CACHE_CONTROL, "no-cache");
		self.add_header(header::PRAGMA, "no-cache");
	}

	pub fn add_header<K: IntoHeaderName>(&mut self, name: K, value: &str) {
		if let Ok(value) = HeaderValue::from_str(value) {
			self.headers.append(name, value);
		}
	}
}

#[derive(Debug)]
pub enum CheckOutcome {
	Ok(OkResponse),
	Denied(DeniedResponse),
}

/// The full result of one check call.
#[derive(Debug)]
pub struct CheckResponse {
	pub code: Code,
	pub outcome: CheckOutcome,
}

impl CheckResponse {
	pub fn ok(response: OkResponse) -> Self {
		Self {
			code: Code::Ok,
			outcome: CheckOutcome::Ok(response),
		}
	}

	pub fn denied(code: Code, response: DeniedResponse) -> Self {
		Self {
			code,
			outcome: CheckOutcome::Denied(response),
		}
	}
}
