//! Symmetric encryption for the state cookie payload.

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use aws_lc_rs::hkdf;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const STATE_COOKIE_AAD: &[u8] = b"authservice_state_cookie";
const KEY_DERIVATION_INFO: &[u8] = b"authservice_token_encryptor";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
	#[error("encryption failed")]
	Encrypt,
	#[error("ciphertext rejected")]
	Decrypt,
}

/// Seals short strings into opaque cookie-safe values and back.
pub trait TokenEncryptor: Send + Sync {
	fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
	fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM encryptor. The random 96-bit nonce is prefixed to the
/// ciphertext and the whole sealed value is URL-safe base64 without padding,
/// so it can sit directly in a cookie value.
pub struct AesGcmTokenEncryptor {
	key: LessSafeKey,
}

impl AesGcmTokenEncryptor {
	/// Derives the AES key from the configured secret with HKDF-SHA256 so a
	/// short human-chosen secret still yields a full-width key.
	pub fn new(secret: &str) -> anyhow::Result<Self> {
		let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
		let prk = salt.extract(secret.as_bytes());
		let info = [KEY_DERIVATION_INFO];
		let okm = prk
			.expand(&info, hkdf::HKDF_SHA256)
			.map_err(|_| anyhow::anyhow!("HKDF expansion failed"))?;
		let mut key_bytes = [0u8; 32];
		okm
			.fill(&mut key_bytes)
			.map_err(|_| anyhow::anyhow!("HKDF fill failed"))?;
		let unbound =
			UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| anyhow::anyhow!("invalid key"))?;
		Ok(Self {
			key: LessSafeKey::new(unbound),
		})
	}
}

impl TokenEncryptor for AesGcmTokenEncryptor {
	fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
		let mut nonce_bytes = [0u8; NONCE_LEN];
		let mut rng = rand::rng();
		rng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::assume_unique_for_key(nonce_bytes);

		let mut in_out = Vec::with_capacity(plaintext.len() + AES_256_GCM.tag_len());
		in_out.extend_from_slice(plaintext.as_bytes());
		self
			.key
			.seal_in_place_append_tag(nonce, Aad::from(STATE_COOKIE_AAD), &mut in_out)
			.map_err(|_| CryptoError::Encrypt)?;

		// Prefix the nonce so decryption can reconstruct the AEAD input.
		let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
		sealed.extend_from_slice(&nonce_bytes);
		sealed.extend_from_slice(&in_out);
		Ok(URL_SAFE_NO_PAD.encode(sealed))
	}

	fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
		let mut data = URL_SAFE_NO_PAD
			.decode(ciphertext)
			.map_err(|_| CryptoError::Decrypt)?;
		if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
			return Err(CryptoError::Decrypt);
		}
		let nonce =
			Nonce::try_assume_unique_for_key(&data[..NONCE_LEN]).map_err(|_| CryptoError::Decrypt)?;
		let plaintext_len = {
			let in_out = &mut data[NONCE_LEN..];
			let plaintext = self
				.key
				.open_in_place(nonce, Aad::from(STATE_COOKIE_AAD), in_out)
				.map_err(|_| CryptoError::Decrypt)?;
			plaintext.len()
		};
		data.copy_within(NONCE_LEN..NONCE_LEN + plaintext_len, 0);
		data.truncate(plaintext_len);
		String::from_utf8(data).map_err(|_| CryptoError::Decrypt)
	}
}
