//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias using CryptoError
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Error during key generation
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Error during encryption
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Error during decryption
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid key material (wrong length for the algorithm, etc)
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid nonce/IV value
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    /// Unsupported algorithm name
    #[error("unsupported algorithm: {0}")]
    Unsupported(String),

    /// I/O error during a cryptographic operation
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CryptoError {
    fn from(e: std::io::Error) -> Self {
        CryptoError::Io(e.to_string())
    }
}
