//! AES-256-GCM envelope for short secrets stored at rest.
//!
//! Ciphertext text form is `base64(nonce || ciphertext || tag)` using the
//! standard alphabet with padding. The nonce is 12 bytes and fresh per call.

use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use std::fmt;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Encrypts and decrypts profile secrets.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// Build from raw key material.
    ///
    /// Shorter input is right-padded with zero bytes, longer input is
    /// truncated to 32 bytes.
    pub fn new(key_material: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        let n = key_material.len().min(KEY_LEN);
        key[..n].copy_from_slice(&key_material[..n]);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self { cipher }
    }

    pub fn from_passphrase(key: &str) -> Self {
        Self::new(key.as_bytes())
    }

    /// Encrypt a UTF-8 string. Empty input yields empty output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptFailed {
                reason: e.to_string(),
            })?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(&combined))
    }

    /// Reverse [`Encryptor::encrypt`]. Empty input yields empty output.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let combined =
            BASE64_STANDARD
                .decode(encoded)
                .map_err(|e| CryptoError::InvalidEncoding {
                    reason: e.to_string(),
                })?;

        if combined.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort {
                len: combined.len(),
            });
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encryptor() -> Encryptor {
        Encryptor::from_passphrase("a-test-key-that-is-long-enough-xx")
    }

    #[test]
    fn test_empty_round_trip() {
        let enc = encryptor();
        assert_eq!(enc.encrypt("").unwrap(), "");
        assert_eq!(enc.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_encryption_is_nondeterministic() {
        let enc = encryptor();
        let a = enc.encrypt("smtp-password").unwrap();
        let b = enc.encrypt("smtp-password").unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.decrypt(&a).unwrap(), "smtp-password");
        assert_eq!(enc.decrypt(&b).unwrap(), "smtp-password");
    }

    #[test]
    fn test_short_key_is_zero_padded() {
        let short = Encryptor::from_passphrase("abc");
        let mut padded = b"abc".to_vec();
        padded.resize(KEY_LEN, 0);
        let explicit = Encryptor::new(&padded);

        let sealed = short.encrypt("secret").unwrap();
        assert_eq!(explicit.decrypt(&sealed).unwrap(), "secret");
    }

    #[test]
    fn test_long_key_is_truncated() {
        let long = Encryptor::new(&[7u8; 48]);
        let exact = Encryptor::new(&[7u8; 32]);
        let sealed = long.encrypt("secret").unwrap();
        assert_eq!(exact.decrypt(&sealed).unwrap(), "secret");
    }

    #[test]
    fn test_decrypt_too_short() {
        let short = BASE64_STANDARD.encode(b"short");
        let err = encryptor().decrypt(&short).unwrap_err();
        assert_eq!(err, CryptoError::CiphertextTooShort { len: 5 });
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let err = encryptor().decrypt("not base64!!").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEncoding { .. }));
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails_authentication() {
        let sealed = encryptor().encrypt("secret").unwrap();
        let other = Encryptor::from_passphrase("another-key");
        assert_eq!(
            other.decrypt(&sealed).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_decrypt_corrupted_ciphertext() {
        let enc = encryptor();
        let sealed = enc.encrypt("secret").unwrap();
        let mut bytes = BASE64_STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let corrupted = BASE64_STANDARD.encode(&bytes);
        assert_eq!(
            enc.decrypt(&corrupted).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(key in proptest::collection::vec(any::<u8>(), 0..64), s in ".*") {
            let enc = Encryptor::new(&key);
            let sealed = enc.encrypt(&s).unwrap();
            prop_assert_eq!(enc.decrypt(&sealed).unwrap(), s);
        }
    }
}
