//! Protocol-layer error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol-layer errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope or frame could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// JSON encoding failed.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// JSON decoding failed.
    #[error("decoding error: {0}")]
    DecodingError(String),

    /// The underlying encryption layer rejected the payload.
    #[error("encryption error: {0}")]
    Encryption(#[from] meshsock_crypto::CryptoError),

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Originating state.
        from: String,
        /// Rejected target state.
        to: String,
    },
}
