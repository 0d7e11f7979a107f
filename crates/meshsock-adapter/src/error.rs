//! Adapter errors. Per the contract, these are logged at the call site and
//! never propagated into a peer-fatal path.

use thiserror::Error;

/// Errors from an [`crate::Adapter`] implementation.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The backing store (Redis, Mongo) returned an error.
    #[error("backing store error: {0}")]
    Backend(String),
    /// A relay payload could not be encoded or decoded.
    #[error("relay message (de)serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
    /// The adapter was used before `init` or after `close`.
    #[error("adapter not initialized")]
    NotInitialized,
}

/// Convenience alias for this crate's `Result`.
pub type Result<T> = std::result::Result<T, AdapterError>;
