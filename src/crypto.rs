//! Secret encryption collaborator.
//!
//! Commands encrypt client secrets and bind passwords right before they are
//! embedded in an event. The log, the write models and the projection tables
//! only ever see the resulting [`CryptoValue`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a [`CryptoValue`] was produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoType {
    #[default]
    Encryption,
    Hash,
}

/// An opaque encrypted secret, stored as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoValue {
    pub crypto_type: CryptoType,
    pub algorithm: String,
    pub key_id: String,
    pub crypted: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption key `{0}` not found")]
    KeyNotFound(String),
    #[error("algorithm `{expected}` cannot decrypt a `{actual}` value")]
    AlgorithmMismatch { expected: String, actual: String },
    #[error("encryption failed: {0}")]
    Failed(String),
}

/// Turns plaintext into a [`CryptoValue`].
pub trait Encryption: Send + Sync {
    /// # Errors
    ///
    /// Returns [`EncryptionError`] when no key is available or the cipher
    /// fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<CryptoValue, EncryptionError>;
}

impl<T: Encryption + ?Sized> Encryption for std::sync::Arc<T> {
    fn encrypt(&self, plaintext: &[u8]) -> Result<CryptoValue, EncryptionError> {
        (**self).encrypt(plaintext)
    }
}

/// Byte-wise XOR with a single key byte.
///
/// Not a cipher. It keeps plaintext out of the log and tables in tests and
/// demos, and lets test harnesses compare secrets after decryption.
#[derive(Clone, Debug)]
pub struct ReversibleEncryption {
    key_id: String,
    key: u8,
}

impl ReversibleEncryption {
    pub const ALGORITHM: &'static str = "xor";

    #[must_use]
    pub fn new(key_id: impl Into<String>, key: u8) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    /// Recover the plaintext of a value produced by [`encrypt`](Encryption::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::AlgorithmMismatch`] for values of another
    /// algorithm, [`EncryptionError::KeyNotFound`] for another key, and
    /// [`EncryptionError::Failed`] when the plaintext is not UTF-8.
    pub fn decrypt(&self, value: &CryptoValue) -> Result<String, EncryptionError> {
        if value.algorithm != Self::ALGORITHM {
            return Err(EncryptionError::AlgorithmMismatch {
                expected: Self::ALGORITHM.to_string(),
                actual: value.algorithm.clone(),
            });
        }
        if value.key_id != self.key_id {
            return Err(EncryptionError::KeyNotFound(value.key_id.clone()));
        }
        let plain = value.crypted.iter().map(|byte| byte ^ self.key).collect();
        String::from_utf8(plain).map_err(|err| EncryptionError::Failed(err.to_string()))
    }
}

impl Default for ReversibleEncryption {
    fn default() -> Self {
        Self::new("test-key", 0x5a)
    }
}

impl Encryption for ReversibleEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<CryptoValue, EncryptionError> {
        Ok(CryptoValue {
            crypto_type: CryptoType::Encryption,
            algorithm: Self::ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            crypted: plaintext.iter().map(|byte| byte ^ self.key).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_value_hides_plaintext_and_decrypts() {
        let encryption = ReversibleEncryption::default();
        let value = encryption.encrypt(b"s1").unwrap();
        assert_ne!(value.crypted, b"s1".to_vec());
        assert_eq!(encryption.decrypt(&value).unwrap(), "s1");
    }

    #[test]
    fn decrypt_rejects_foreign_keys() {
        let value = ReversibleEncryption::new("a", 1).encrypt(b"x").unwrap();
        let err = ReversibleEncryption::new("b", 1).decrypt(&value).unwrap_err();
        assert!(matches!(err, EncryptionError::KeyNotFound(key) if key == "a"));
    }

    #[test]
    fn crypto_value_serializes_as_json_object() {
        let value = ReversibleEncryption::default().encrypt(b"s").unwrap();
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["crypto_type"], "encryption");
        assert_eq!(json["algorithm"], "xor");
        let back: CryptoValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }
}
