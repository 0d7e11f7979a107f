//! Fast, non-cryptographic hashing used for cache keys.
//!
//! Never use this for anything security-sensitive; it exists purely to
//! turn variable-length strings into cheap, fixed-width map keys.

pub mod fnv;

pub use fnv::fnv1a_hex;
