//! AES-128/256-CBC encryption with PKCS7 padding.

use aes::{Aes128, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::Algorithm;
use crate::error::{CryptoError, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt `plaintext` under `algorithm` (a CBC variant), PKCS7-padding it
/// to the block size. `key` and `iv` must already be sized correctly.
pub fn encrypt(algorithm: Algorithm, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        Algorithm::Aes128Cbc => {
            let enc = Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        Algorithm::Aes256Cbc => {
            let enc = Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        other => Err(CryptoError::Unsupported(other.name().to_string())),
    }
}

/// Decrypt a ciphertext produced by [`encrypt`], stripping PKCS7 padding.
pub fn decrypt(algorithm: Algorithm, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        Algorithm::Aes128Cbc => {
            let dec = Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|e| CryptoError::Decryption(e.to_string()))
        }
        Algorithm::Aes256Cbc => {
            let dec = Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|e| CryptoError::Decryption(e.to_string()))
        }
        other => Err(CryptoError::Unsupported(other.name().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_256() {
        let key = [0u8; 32];
        let iv = [1u8; 16];
        let ct = encrypt(Algorithm::Aes256Cbc, &key, &iv, b"hello world, cbc mode").unwrap();
        let pt = decrypt(Algorithm::Aes256Cbc, &key, &iv, &ct).unwrap();
        assert_eq!(pt, b"hello world, cbc mode");
    }

    #[test]
    fn roundtrip_128() {
        let key = [0u8; 16];
        let iv = [1u8; 16];
        let ct = encrypt(Algorithm::Aes128Cbc, &key, &iv, b"hello world, cbc mode").unwrap();
        let pt = decrypt(Algorithm::Aes128Cbc, &key, &iv, &ct).unwrap();
        assert_eq!(pt, b"hello world, cbc mode");
    }

    #[test]
    fn ciphertext_is_block_aligned() {
        let key = [0u8; 32];
        let iv = [1u8; 16];
        let ct = encrypt(Algorithm::Aes256Cbc, &key, &iv, b"13 bytes long!").unwrap();
        assert_eq!(ct.len() % 16, 0);
    }

    #[test]
    fn wrong_key_fails_or_garbles() {
        let iv = [1u8; 16];
        let ct = encrypt(Algorithm::Aes256Cbc, &[0u8; 32], &iv, b"secret message").unwrap();
        // CBC has no authentication tag; a wrong key either fails padding
        // validation or silently produces the wrong plaintext. We assert
        // it never reproduces the original.
        match decrypt(Algorithm::Aes256Cbc, &[1u8; 32], &iv, &ct) {
            Ok(pt) => assert_ne!(pt, b"secret message"),
            Err(_) => {}
        }
    }
}
