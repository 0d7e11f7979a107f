//! Transparent text-payload encryption.
//!
//! Wraps [`crate::symmetric::Algorithm`] with key management, a
//! `generateKey`/`deriveKeyFromPassword`-style surface, and an LRU+TTL
//! cache in front of repeated encryptions of the same plaintext (fan-out
//! broadcasts re-encrypt the same envelope for many peers).

mod cache;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use rand_core::OsRng;

pub use cache::{EncryptionCache, EncryptionCacheEntry};

use crate::error::{CryptoError, Result};
use crate::kdf::derive_key_from_password;
use crate::mem::SecureBuf;
use crate::symmetric::Algorithm;

/// Minimum decoded length for [`Encryption::is_likely_ciphertext`] to
/// consider a string plausible ciphertext: enough for an IV plus at
/// least one byte of payload.
const LIKELY_CIPHERTEXT_MIN_BYTES: usize = 20;

/// Configuration for an [`Encryption`] instance.
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Shared symmetric key. Its length determines the default algorithm
    /// when `algorithm` is `None`.
    pub key: Vec<u8>,
    /// Algorithm to use. Defaults to the key-length convention
    /// (16 bytes → AES-128-GCM, 32 bytes → AES-256-GCM) when `None`.
    pub algorithm: Option<Algorithm>,
    /// Whether encryption is active. When `false`, `encrypt`/`decrypt`
    /// are identity functions.
    pub enabled: bool,
    /// Maximum number of cached ciphertexts.
    pub cache_size: usize,
    /// Time-to-live for cache entries.
    pub cache_ttl: Duration,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: Vec::new(),
            algorithm: None,
            enabled: false,
            cache_size: 1000,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Transparent encrypt/decrypt of text payloads, with a cache that
/// amortizes repeated encryption of identical plaintexts across peers.
pub struct Encryption {
    key: SecureBuf<Vec<u8>>,
    algorithm: Algorithm,
    enabled: bool,
    cache: EncryptionCache,
}

impl Encryption {
    /// Construct an `Encryption` from configuration.
    ///
    /// Fails if a key is given whose length doesn't match the (explicit
    /// or inferred) algorithm.
    pub fn new(config: EncryptionConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self {
                key: SecureBuf::new(Vec::new()),
                algorithm: Algorithm::Aes256Gcm,
                enabled: false,
                cache: EncryptionCache::new(config.cache_size, config.cache_ttl),
            });
        }

        let algorithm = match config.algorithm {
            Some(a) => a,
            None => Algorithm::default_for_key_len(config.key.len())?,
        };
        if config.key.len() != algorithm.key_size() {
            return Err(CryptoError::InvalidKey(format!(
                "{} requires a {}-byte key, got {}",
                algorithm.name(),
                algorithm.key_size(),
                config.key.len()
            )));
        }

        Ok(Self {
            key: SecureBuf::new(config.key),
            algorithm,
            enabled: true,
            cache: EncryptionCache::new(config.cache_size, config.cache_ttl),
        })
    }

    /// Whether encryption is active for this instance.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The algorithm in use.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, returning `base64(iv || ciphertext[ || tag])`.
    ///
    /// Identity function when encryption is disabled. Reuses a cached
    /// ciphertext for repeated calls with the same plaintext, so that
    /// broadcasting one envelope to many peers encrypts it once.
    pub fn encrypt(&mut self, plaintext: &str) -> Result<String> {
        if !self.enabled {
            return Ok(plaintext.to_string());
        }

        let cache_key = cache::cache_key(self.algorithm, plaintext);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let raw = self.algorithm.encrypt(self.key.expose_secret(), plaintext.as_bytes())?;
        let encoded = BASE64.encode(raw);
        self.cache.insert(cache_key, encoded.clone());
        Ok(encoded)
    }

    /// Decrypt a `base64(iv || ciphertext[ || tag])` string produced by
    /// [`Encryption::encrypt`].
    ///
    /// Identity function when encryption is disabled.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if !self.enabled {
            return Ok(ciphertext.to_string());
        }

        let raw = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        let plain = self.algorithm.decrypt(self.key.expose_secret(), &raw)?;
        String::from_utf8(plain).map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    /// Heuristically determine whether `s` looks like ciphertext produced
    /// by this module: pure base64 that decodes to more than
    /// [`LIKELY_CIPHERTEXT_MIN_BYTES`] bytes (enough for an IV plus at
    /// least one byte of payload).
    ///
    /// A string that decodes to exactly that many bytes is treated as
    /// *not* likely ciphertext — the threshold is strict.
    pub fn is_likely_ciphertext(s: &str) -> bool {
        match BASE64.decode(s) {
            Ok(bytes) => bytes.len() > LIKELY_CIPHERTEXT_MIN_BYTES,
            Err(_) => false,
        }
    }

    /// Generate a random key of the given size in bits (128 or 256).
    pub fn generate_key(bits: u32) -> Result<Vec<u8>> {
        let len = match bits {
            128 => 16,
            256 => 32,
            other => {
                return Err(CryptoError::Unsupported(format!(
                    "unsupported key size: {other} bits"
                )))
            }
        };
        let mut key = vec![0u8; len];
        OsRng.fill_bytes(&mut key);
        Ok(key)
    }

    /// Derive a key from a password. See [`derive_key_from_password`].
    pub fn derive_key_from_password(password: &str, bits: u32) -> Result<Vec<u8>> {
        derive_key_from_password(password, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(key: Vec<u8>) -> Encryption {
        Encryption::new(EncryptionConfig {
            key,
            algorithm: None,
            enabled: true,
            cache_size: 100,
            cache_ttl: Duration::from_secs(60),
        })
        .unwrap()
    }

    #[test]
    fn disabled_is_identity() {
        let mut enc = Encryption::new(EncryptionConfig::default()).unwrap();
        let original = "plain as day";
        assert_eq!(enc.encrypt(original).unwrap(), original);
        assert_eq!(enc.decrypt(original).unwrap(), original);
    }

    #[test]
    fn roundtrip() {
        let mut enc = enabled(vec![0u8; 32]);
        let ciphertext = enc.encrypt("secret message").unwrap();
        assert_ne!(ciphertext, "secret message");
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), "secret message");
    }

    #[test]
    fn cache_returns_same_ciphertext_for_identical_plaintext() {
        let mut enc = enabled(vec![0u8; 32]);
        let a = enc.encrypt("repeat me").unwrap();
        let b = enc.encrypt("repeat me").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_algorithm_key_length_fails_construction() {
        let result = Encryption::new(EncryptionConfig {
            key: vec![0u8; 10],
            algorithm: None,
            enabled: true,
            cache_size: 100,
            cache_ttl: Duration::from_secs(60),
        });
        assert!(result.is_err());
    }

    #[test]
    fn generate_key_has_correct_length() {
        assert_eq!(Encryption::generate_key(128).unwrap().len(), 16);
        assert_eq!(Encryption::generate_key(256).unwrap().len(), 32);
    }

    #[test]
    fn is_likely_ciphertext_boundary() {
        // 20 decoded bytes exactly: not likely (strict >).
        let exactly_20 = BASE64.encode([0u8; 20]);
        assert!(!Encryption::is_likely_ciphertext(&exactly_20));

        let twenty_one = BASE64.encode([0u8; 21]);
        assert!(Encryption::is_likely_ciphertext(&twenty_one));

        assert!(!Encryption::is_likely_ciphertext("not base64 at all!!"));
    }
}
