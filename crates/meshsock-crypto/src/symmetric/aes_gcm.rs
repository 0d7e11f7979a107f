//! AES-128/256-GCM encryption.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};

use super::Algorithm;
use crate::error::{CryptoError, Result};

/// Encrypt `plaintext` under `algorithm`, returning ciphertext with the
/// authentication tag appended. `key` and `nonce` must already be sized
/// correctly for `algorithm`.
pub fn encrypt(algorithm: Algorithm, key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: plaintext,
        aad: &[],
    };

    match algorithm {
        Algorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .encrypt(nonce, payload)
            .map_err(|e| CryptoError::Encryption(e.to_string())),
        Algorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .encrypt(nonce, payload)
            .map_err(|e| CryptoError::Encryption(e.to_string())),
        other => Err(CryptoError::Unsupported(other.name().to_string())),
    }
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(algorithm: Algorithm, key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: ciphertext,
        aad: &[],
    };

    match algorithm {
        Algorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .decrypt(nonce, payload)
            .map_err(|e| CryptoError::Decryption(e.to_string())),
        Algorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .decrypt(nonce, payload)
            .map_err(|e| CryptoError::Decryption(e.to_string())),
        other => Err(CryptoError::Unsupported(other.name().to_string())),
    }
}
