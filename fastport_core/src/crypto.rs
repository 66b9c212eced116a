//! Envelope verification and token-registration crypto.
//!
//! Message payloads are end-to-end encrypted by clients and pass through
//! the broker untouched. The only ciphertext the broker opens is the
//! `register_fcm_token` envelope: AES-256-GCM under a key derived from
//! the session's secret key, carried as base64(nonce ‖ ciphertext).

use aes_gcm::{
  aead::{Aead, KeyInit},
  Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CoreError;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;
/// Secret keys are 32 random bytes, serialized as hex.
const SECRET_KEY_BYTES: usize = 32;

/// Decrypted contents of a token-registration envelope.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenEnvelope {
  pub token: String,
  pub device_id: String,
  pub platform: String,
}

/// Generates a fresh session secret: 32 cryptographically-random bytes
/// as lowercase hex.
pub fn generate_secret_key() -> String {
  let mut bytes = [0u8; SECRET_KEY_BYTES];
  rand::thread_rng().fill_bytes(&mut bytes);
  hex::encode(bytes)
}

/// Constant-time string equality. Length is not treated as secret.
pub fn ct_eq(a: &str, b: &str) -> bool {
  a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn sha256_hex(data: &[u8]) -> String {
  hex::encode(Sha256::digest(data))
}

/// Checks the client-supplied SHA-256 of `encrypted_data` against the
/// computed digest, comparing in constant time.
pub fn verify_envelope_hash(encrypted_data: &str, expected_hex: &str) -> bool {
  ct_eq(&sha256_hex(encrypted_data.as_bytes()), &expected_hex.to_lowercase())
}

/// Derives the session's symmetric key from its secret-key string.
fn derive_session_key(secret_key: &str) -> [u8; 32] {
  Sha256::digest(secret_key.as_bytes()).into()
}

/// Opens a token-registration envelope and parses the registration
/// fields out of the plaintext JSON.
pub fn decrypt_token_envelope(
  secret_key: &str,
  encrypted_data: &str,
) -> Result<TokenEnvelope, CoreError> {
  let raw = BASE64
    .decode(encrypted_data)
    .map_err(|e| CoreError::Crypto(format!("invalid envelope encoding: {e}")))?;
  if raw.len() <= NONCE_SIZE {
    return Err(CoreError::Crypto("envelope too short".to_string()));
  }
  let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);

  let key = derive_session_key(secret_key);
  let cipher = Aes256Gcm::new_from_slice(&key).expect("valid key length");
  let plaintext = cipher
    .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
    .map_err(|e| CoreError::Crypto(format!("decryption failed: {e}")))?;

  serde_json::from_slice(&plaintext)
    .map_err(|e| CoreError::Crypto(format!("invalid envelope payload: {e}")))
}

/// Seals a token envelope. The broker itself never encrypts; this is
/// the client half of the contract, kept here for tests and tooling.
pub fn encrypt_token_envelope(
  secret_key: &str,
  envelope_json: &[u8],
) -> Result<String, CoreError> {
  let key = derive_session_key(secret_key);
  let cipher = Aes256Gcm::new_from_slice(&key).expect("valid key length");

  let mut nonce_bytes = [0u8; NONCE_SIZE];
  rand::thread_rng().fill_bytes(&mut nonce_bytes);
  let ciphertext = cipher
    .encrypt(Nonce::from_slice(&nonce_bytes), envelope_json)
    .map_err(|e| CoreError::Crypto(format!("encryption failed: {e}")))?;

  let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
  raw.extend_from_slice(&nonce_bytes);
  raw.extend_from_slice(&ciphertext);
  Ok(BASE64.encode(raw))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn secret_keys_are_32_bytes_hex_and_unique() {
    let a = generate_secret_key();
    let b = generate_secret_key();
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
  }

  #[test]
  fn envelope_hash_round_trip() {
    let data = "b2theSBzb21lIGNpcGhlcnRleHQ=";
    let hash = sha256_hex(data.as_bytes());
    assert!(verify_envelope_hash(data, &hash));
    assert!(verify_envelope_hash(data, &hash.to_uppercase()));
    assert!(!verify_envelope_hash(data, &sha256_hex(b"other")));
  }

  #[test]
  fn token_envelope_round_trip() {
    let secret = generate_secret_key();
    let plaintext = br#"{"token":"fcm-abc","deviceId":"dev-1","platform":"android"}"#;
    let sealed = encrypt_token_envelope(&secret, plaintext).unwrap();

    let opened = decrypt_token_envelope(&secret, &sealed).unwrap();
    assert_eq!(opened.token, "fcm-abc");
    assert_eq!(opened.device_id, "dev-1");
    assert_eq!(opened.platform, "android");
  }

  #[test]
  fn wrong_key_fails_closed() {
    let sealed = encrypt_token_envelope("key-a", br#"{"token":"t","deviceId":"d","platform":"ios"}"#)
      .unwrap();
    assert!(decrypt_token_envelope("key-b", &sealed).is_err());
  }

  #[test]
  fn garbage_envelopes_rejected() {
    assert!(decrypt_token_envelope("k", "not base64 !!!").is_err());
    assert!(decrypt_token_envelope("k", &BASE64.encode([0u8; 4])).is_err());
  }
}
