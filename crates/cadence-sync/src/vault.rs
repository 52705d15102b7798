//! Credential vault: AES-256-GCM over every credential stored at rest.
//!
//! Sealed values are `base64(nonce || ciphertext || tag)` with a fresh
//! 12-byte random nonce per encryption, so sealing the same plaintext twice
//! yields different text.

use aes_gcm::{
  Aes256Gcm, Key, KeyInit, Nonce,
  aead::{Aead, OsRng, rand_core::RngCore},
};
use argon2::Argon2;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use cadence_core::subject::Sealed;
use serde::Deserialize;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
  #[error("invalid vault key: {0}")]
  InvalidKey(String),

  #[error("encryption failed")]
  Encrypt,

  #[error("decryption failed")]
  Decrypt,

  #[error("sealed value is not valid base64")]
  Encoding,

  #[error("decrypted credential is not valid UTF-8")]
  Utf8,
}

/// Where the vault key comes from. Exactly one of `key_hex` and
/// `passphrase` should be set; `key_hex` wins when both are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
  /// 64 hex characters (32 bytes).
  pub key_hex:    Option<String>,
  pub passphrase: Option<String>,
  /// Salt for passphrase derivation; at least 8 bytes.
  pub salt:       Option<String>,
}

const DEFAULT_SALT: &str = "cadence-credential-vault";

#[derive(Clone)]
pub struct Vault {
  cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Vault").field("key", &"[REDACTED]").finish()
  }
}

impl Vault {
  pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
    Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) }
  }

  pub fn from_hex(key_hex: &str) -> Result<Self, VaultError> {
    let bytes = hex::decode(key_hex.trim()).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
    let key: [u8; KEY_LEN] = bytes
      .try_into()
      .map_err(|b: Vec<u8>| VaultError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))?;
    Ok(Self::from_key(&key))
  }

  /// Derive the key from a passphrase with argon2.
  pub fn from_passphrase(passphrase: &str, salt: &str) -> Result<Self, VaultError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
      .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
      .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
    Ok(Self::from_key(&key))
  }

  pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
    match (&config.key_hex, &config.passphrase) {
      (Some(key), _) => Self::from_hex(key),
      (None, Some(passphrase)) => {
        Self::from_passphrase(passphrase, config.salt.as_deref().unwrap_or(DEFAULT_SALT))
      }
      (None, None) => Err(VaultError::InvalidKey("neither key_hex nor passphrase is set".into())),
    }
  }

  pub fn seal(&self, plaintext: &str) -> Result<Sealed, VaultError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = self
      .cipher
      .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
      .map_err(|_| VaultError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(Sealed(B64.encode(out)))
  }

  pub fn open(&self, sealed: &Sealed) -> Result<String, VaultError> {
    let raw = B64.decode(sealed.as_str()).map_err(|_| VaultError::Encoding)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
      return Err(VaultError::Decrypt);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    let plaintext = self
      .cipher
      .decrypt(Nonce::from_slice(nonce), ciphertext)
      .map_err(|_| VaultError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| VaultError::Utf8)
  }
}
