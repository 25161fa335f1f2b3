//! Encoding of the `(state, nonce)` pair carried by the state cookie.

/// Separator between state and nonce. Outside the URL-safe base64 alphabet
/// both values are drawn from, so the encoding is unambiguous.
const DELIMITER: char = ';';

pub fn encode(state: &str, nonce: &str) -> String {
	format!("{state}{DELIMITER}{nonce}")
}

/// Recovers `(state, nonce)`. Fails on a missing delimiter, an empty part,
/// or a stray second delimiter.
pub fn decode(payload: &str) -> Option<(String, String)> {
	let (state, nonce) = payload.split_once(DELIMITER)?;
	if state.is_empty() || nonce.is_empty() || nonce.contains(DELIMITER) {
		return None;
	}
	Some((state.to_string(), nonce.to_string()))
}
