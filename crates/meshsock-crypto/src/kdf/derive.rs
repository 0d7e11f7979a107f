//! Password-based key derivation.
//!
//! Deliberately simple: SHA-256 the password, truncate to the key length
//! the chosen algorithm needs. There is no salt and no iteration count —
//! callers that need resistance to offline brute force should generate a
//! random key instead and distribute it out of band.

use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};

/// Derive a 16- or 32-byte key from a password.
///
/// `bits` must be 128 or 256.
pub fn derive_key_from_password(password: &str, bits: u32) -> Result<Vec<u8>> {
    let len = match bits {
        128 => 16,
        256 => 32,
        other => {
            return Err(CryptoError::Unsupported(format!(
                "unsupported key size: {other} bits"
            )))
        }
    };

    let digest = Sha256::digest(password.as_bytes());
    Ok(digest[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_correct_lengths() {
        assert_eq!(derive_key_from_password("hunter2", 128).unwrap().len(), 16);
        assert_eq!(derive_key_from_password("hunter2", 256).unwrap().len(), 32);
    }

    #[test]
    fn deterministic() {
        let a = derive_key_from_password("hunter2", 256).unwrap();
        let b = derive_key_from_password("hunter2", 256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_passwords_differ() {
        let a = derive_key_from_password("hunter2", 256).unwrap();
        let b = derive_key_from_password("hunter3", 256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_bit_size() {
        assert!(derive_key_from_password("x", 192).is_err());
    }

    #[test]
    fn key_is_prefix_of_full_digest() {
        let full = Sha256::digest(b"hunter2");
        let derived = derive_key_from_password("hunter2", 128).unwrap();
        assert_eq!(&full[..16], derived.as_slice());
    }
}
