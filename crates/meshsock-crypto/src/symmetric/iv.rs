//! Fresh IV/nonce generation.
//!
//! Every encryption in this crate uses a per-call random IV rather than a
//! counter, so there is no cross-call state to synchronize or persist —
//! this is what lets [`super::Algorithm::encrypt`] be called repeatedly
//! with the same key without the caller tracking anything.

use rand::RngCore;
use rand_core::OsRng;

/// Generate `len` random bytes suitable for use as an IV or nonce.
pub fn random_iv(len: usize) -> Vec<u8> {
    let mut iv = vec![0u8; len];
    OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_length() {
        assert_eq!(random_iv(12).len(), 12);
        assert_eq!(random_iv(16).len(), 16);
    }

    #[test]
    fn not_all_zero_with_overwhelming_probability() {
        let iv = random_iv(16);
        assert_ne!(iv, vec![0u8; 16]);
    }

    #[test]
    fn successive_calls_differ() {
        assert_ne!(random_iv(12), random_iv(12));
    }
}
