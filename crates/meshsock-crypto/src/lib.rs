//! # meshsock-crypto
//!
//! Symmetric encryption for transparent payload encryption, a cheap
//! non-cryptographic hash for cache keys, and the memory-hygiene helpers
//! both of those lean on.
//!
//! ## Features
//!
//! - Transparent AES-{128,256}-{GCM,CBC} encryption with an LRU+TTL cache
//!   in front of it
//! - Password-based key derivation (SHA-256, truncated)
//! - FNV-1a 32-bit hashing for non-security-sensitive cache keys
//! - Automatic zeroization of key material

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod encryption;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod mem;
pub mod symmetric;

pub use encryption::{Encryption, EncryptionConfig};
pub use error::{CryptoError, Result};
pub use hash::fnv1a_hex;
pub use symmetric::Algorithm;

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the cryptography library (e.g., prevent core dumps)
///
/// Call this once at process startup.
pub fn init() -> Result<()> {
    mem::wipe::prevent_core_dumps()?;
    Ok(())
}
