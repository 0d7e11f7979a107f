//! Wire envelope, codec, serialization cache, and outbound queue shared by
//! the server and client.

#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod queue;
pub mod wire;

pub use error::ProtocolError;
pub use wire::{Envelope, EnvelopeType, Frame, MessageCodec};

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
