//! Symmetric encryption primitives: AES-{128,256}-{GCM,CBC}.

pub mod aes_cbc;
pub mod aes_gcm;
pub mod iv;

pub use iv::random_iv;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};

/// A supported symmetric algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-128 in GCM mode.
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    /// AES-256 in GCM mode.
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// AES-128 in CBC mode with PKCS7 padding.
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    /// AES-256 in CBC mode with PKCS7 padding.
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
}

impl Algorithm {
    /// Parse an algorithm from its wire name (e.g. `"aes-256-gcm"`).
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "aes-128-gcm" => Ok(Algorithm::Aes128Gcm),
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "aes-128-cbc" => Ok(Algorithm::Aes128Cbc),
            "aes-256-cbc" => Ok(Algorithm::Aes256Cbc),
            other => Err(CryptoError::Unsupported(other.to_string())),
        }
    }

    /// The wire name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Aes128Gcm => "aes-128-gcm",
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::Aes128Cbc => "aes-128-cbc",
            Algorithm::Aes256Cbc => "aes-256-cbc",
        }
    }

    /// The key size this algorithm requires, in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            Algorithm::Aes128Gcm | Algorithm::Aes128Cbc => 16,
            Algorithm::Aes256Gcm | Algorithm::Aes256Cbc => 32,
        }
    }

    /// The IV/nonce size this algorithm requires, in bytes.
    ///
    /// GCM uses a 12-byte nonce; CBC uses a 16-byte block-sized IV.
    pub fn iv_size(&self) -> usize {
        match self {
            Algorithm::Aes128Gcm | Algorithm::Aes256Gcm => 12,
            Algorithm::Aes128Cbc | Algorithm::Aes256Cbc => 16,
        }
    }

    /// Whether this algorithm is a GCM (AEAD) mode.
    pub fn is_gcm(&self) -> bool {
        matches!(self, Algorithm::Aes128Gcm | Algorithm::Aes256Gcm)
    }

    /// Pick the default algorithm for a given key length, per the
    /// 16-byte → AES-128-GCM, 32-byte → AES-256-GCM convention.
    pub fn default_for_key_len(key_len: usize) -> Result<Self> {
        match key_len {
            16 => Ok(Algorithm::Aes128Gcm),
            32 => Ok(Algorithm::Aes256Gcm),
            other => Err(CryptoError::InvalidKey(format!(
                "key length {other} does not map to a default algorithm"
            ))),
        }
    }

    /// Encrypt `plaintext` with `key` under this algorithm, using a fresh
    /// random IV. Returns `iv || ciphertext[ || tag]` (GCM appends its tag
    /// to the ciphertext already; CBC has none).
    pub fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if key.len() != self.key_size() {
            return Err(CryptoError::InvalidKey(format!(
                "{} requires a {}-byte key, got {}",
                self.name(),
                self.key_size(),
                key.len()
            )));
        }
        let iv = random_iv(self.iv_size());
        let body = if self.is_gcm() {
            aes_gcm::encrypt(*self, key, &iv, plaintext)?
        } else {
            aes_cbc::encrypt(*self, key, &iv, plaintext)?
        };
        let mut out = Vec::with_capacity(iv.len() + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decrypt a `iv || ciphertext[ || tag]` blob produced by [`Algorithm::encrypt`].
    pub fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if key.len() != self.key_size() {
            return Err(CryptoError::InvalidKey(format!(
                "{} requires a {}-byte key, got {}",
                self.name(),
                self.key_size(),
                key.len()
            )));
        }
        let iv_size = self.iv_size();
        if data.len() < iv_size {
            return Err(CryptoError::Decryption("ciphertext shorter than IV".into()));
        }
        let (iv, body) = data.split_at(iv_size);
        if self.is_gcm() {
            aes_gcm::decrypt(*self, key, iv, body)
        } else {
            aes_cbc::decrypt(*self, key, iv, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_all_names() {
        for a in [
            Algorithm::Aes128Gcm,
            Algorithm::Aes256Gcm,
            Algorithm::Aes128Cbc,
            Algorithm::Aes256Cbc,
        ] {
            assert_eq!(Algorithm::parse(a.name()).unwrap(), a);
        }
    }

    #[test]
    fn default_for_key_len() {
        assert_eq!(Algorithm::default_for_key_len(16).unwrap(), Algorithm::Aes128Gcm);
        assert_eq!(Algorithm::default_for_key_len(32).unwrap(), Algorithm::Aes256Gcm);
        assert!(Algorithm::default_for_key_len(24).is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        let key = vec![0u8; 16];
        assert!(Algorithm::Aes256Gcm.encrypt(&key, b"hi").is_err());
    }
}
