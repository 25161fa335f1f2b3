//! Wire-format helpers: `Set-Cookie`/`Cookie` codecs, query-string and
//! form-urlencoded codecs, path splitting, and HTTP Basic credentials.

use std::collections::{BTreeSet, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tracing::debug;

/// Query strings percent-encode everything outside the RFC 3986 unreserved
/// set.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b'-')
	.remove(b'_')
	.remove(b'.')
	.remove(b'~');

/// Decoded query string: key to values, duplicates preserved in order.
pub type QueryData = HashMap<String, Vec<String>>;

/// Emits `name=value; dir1; dir2; …`. Directives are a `BTreeSet` so the
/// rendered order is deterministic.
pub fn encode_set_cookie(name: &str, value: &str, directives: &BTreeSet<String>) -> String {
	let mut header = format!("{name}={value}");
	for directive in directives {
		header.push_str("; ");
		header.push_str(directive);
	}
	header
}

/// Parses an RFC 6265 `Cookie` header into a name/value map. A malformed
/// pair fails the whole header rather than yielding a partial result.
pub fn decode_cookies(header: &str) -> Option<HashMap<String, String>> {
	let mut cookies = HashMap::new();
	for parsed in cookie::Cookie::split_parse(header) {
		match parsed {
			Ok(c) => {
				cookies.insert(c.name().to_string(), c.value().to_string());
			},
			Err(err) => {
				debug!("malformed cookie header: {err}");
				return None;
			},
		}
	}
	Some(cookies)
}

/// Percent-encodes parameters into a query string. Pairs are sorted by key
/// then value so the output is stable; duplicate keys survive.
pub fn encode_query_data<'a, I>(params: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let mut pairs: Vec<(&str, &str)> = params.into_iter().collect();
	pairs.sort_unstable();
	pairs
		.into_iter()
		.map(|(key, value)| {
			format!(
				"{}={}",
				utf8_percent_encode(key, QUERY_ENCODE_SET),
				utf8_percent_encode(value, QUERY_ENCODE_SET)
			)
		})
		.collect::<Vec<_>>()
		.join("&")
}

/// Encodes parameters as an `application/x-www-form-urlencoded` body,
/// sorted the same way as [`encode_query_data`].
pub fn encode_form_data<'a, I>(params: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let mut pairs: Vec<(&str, &str)> = params.into_iter().collect();
	pairs.sort_unstable();
	let mut serializer = url::form_urlencoded::Serializer::new(String::new());
	for (key, value) in pairs {
		serializer.append_pair(key, value);
	}
	serializer.finish()
}

/// Decodes a query string into a multimap, or fails on a segment without
/// `=` or with undecodable contents.
pub fn decode_query_data(query: &str) -> Option<QueryData> {
	let mut data = QueryData::new();
	if query.is_empty() {
		return Some(data);
	}
	for segment in query.split('&') {
		let (key, value) = segment.split_once('=')?;
		let key = decode_component(key)?;
		let value = decode_component(value)?;
		data.entry(key).or_default().push(value);
	}
	Some(data)
}

fn decode_component(raw: &str) -> Option<String> {
	let raw = raw.replace('+', " ");
	percent_decode_str(&raw)
		.decode_utf8()
		.ok()
		.map(|decoded| decoded.into_owned())
}

/// Splits a request path on the first `?` into `(path, query)`; the query
/// is empty when absent.
pub fn decode_path(path: &str) -> (&str, &str) {
	match path.split_once('?') {
		Some((path, query)) => (path, query),
		None => (path, ""),
	}
}

pub fn encode_basic_auth(client_id: &str, client_secret: &str) -> String {
	format!(
		"Basic {}",
		STANDARD.encode(format!("{client_id}:{client_secret}"))
	)
}
