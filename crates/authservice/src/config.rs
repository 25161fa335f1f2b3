//! Configuration consumed by the OIDC filter. Loading is the embedding
//! service's concern; these types only carry and validate the values.

use std::collections::BTreeSet;
use std::time::Duration;

use http::HeaderName;
use secrecy::SecretString;
use serde::Deserialize;

const MANDATORY_SCOPE: &str = "openid";

const DEFAULT_IDP_TIMEOUT: Duration = Duration::from_secs(10);

/// A network endpoint described as scheme/host/port/path.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
	pub scheme: String,
	pub hostname: String,
	pub port: u16,
	pub path: String,
}

impl Endpoint {
	/// Renders `scheme://host[:port]path`, omitting the port when it is the
	/// scheme default (443 for https, 80 for http). Callback host matching
	/// relies on the same elision rule.
	pub fn to_url(&self) -> String {
		if self.is_default_port() {
			format!("{}://{}{}", self.scheme, self.hostname, self.path)
		} else {
			format!("{}://{}:{}{}", self.scheme, self.hostname, self.port, self.path)
		}
	}

	pub fn is_default_port(&self) -> bool {
		matches!(
			(self.scheme.as_str(), self.port),
			("https", 443) | ("http", 80)
		)
	}

	pub fn host_with_port(&self) -> String {
		format!("{}:{}", self.hostname, self.port)
	}
}

/// Where to place a forwarded token on the upstream request.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderConfig {
	pub header: String,
	#[serde(default)]
	pub preamble: Option<String>,
}

impl HeaderConfig {
	pub fn encode_value(&self, value: &str) -> String {
		match &self.preamble {
			Some(preamble) => format!("{preamble} {value}"),
			None => value.to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutConfig {
	pub path: String,
	pub redirect_to_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
	pub authorization: Endpoint,
	pub token: Endpoint,
	pub callback: Endpoint,
	pub client_id: String,
	pub client_secret: SecretString,
	#[serde(default)]
	pub cookie_name_prefix: String,
	#[serde(default)]
	pub scopes: Vec<String>,
	#[serde(default)]
	pub logout: Option<LogoutConfig>,
	#[serde(default)]
	pub access_token: Option<HeaderConfig>,
	pub id_token: HeaderConfig,
	/// Max-Age of the state cookie, bounding the authorization roundtrip.
	pub timeout: i64,
	pub landing_page: String,
	/// Reject requests whose observed scheme is not https. Off by default:
	/// behind a TLS-terminating proxy the scheme can legitimately be empty.
	#[serde(default)]
	pub require_https: bool,
	/// Deadline for each token-endpoint call, in seconds.
	#[serde(default)]
	pub idp_timeout_secs: Option<u64>,
}

impl OidcConfig {
	pub fn validate(&self) -> anyhow::Result<()> {
		for (name, endpoint) in [
			("authorization", &self.authorization),
			("token", &self.token),
			("callback", &self.callback),
		] {
			if !matches!(endpoint.scheme.as_str(), "http" | "https") {
				anyhow::bail!(
					"{name} endpoint scheme must be http or https, got `{}`",
					endpoint.scheme
				);
			}
			if endpoint.hostname.is_empty() {
				anyhow::bail!("{name} endpoint hostname must not be empty");
			}
			if !endpoint.path.starts_with('/') {
				anyhow::bail!("{name} endpoint path must start with `/`");
			}
		}
		if self.client_id.is_empty() {
			anyhow::bail!("client_id must not be empty");
		}
		if self.timeout <= 0 {
			anyhow::bail!("cookie timeout must be positive, got {}", self.timeout);
		}
		if self.landing_page.is_empty() {
			anyhow::bail!("landing_page must not be empty");
		}
		for header_config in std::iter::once(&self.id_token).chain(self.access_token.as_ref()) {
			if HeaderName::from_bytes(header_config.header.as_bytes()).is_err() {
				anyhow::bail!("invalid header name `{}`", header_config.header);
			}
		}
		if let Some(logout) = &self.logout {
			if !logout.path.starts_with('/') {
				anyhow::bail!("logout path must start with `/`");
			}
			if logout.redirect_to_uri.is_empty() {
				anyhow::bail!("logout redirect_to_uri must not be empty");
			}
		}
		Ok(())
	}

	/// Space-joined scope string with `openid` always included, duplicates
	/// removed, stable ordering.
	pub fn space_delimited_scopes(&self) -> String {
		let mut scopes = BTreeSet::from([MANDATORY_SCOPE]);
		for scope in &self.scopes {
			scopes.insert(scope.as_str());
		}
		scopes.into_iter().collect::<Vec<_>>().join(" ")
	}

	pub fn idp_timeout(&self) -> Duration {
		self.idp_timeout_secs
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_IDP_TIMEOUT)
	}
}
