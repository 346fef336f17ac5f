//! AES-GCM authenticated encryption used for keychain entries.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The
//! keychain identifier is bound as associated data so blobs cannot be moved
//! between keychains.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext was tampered with or sealed under a different key.
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),
    #[error("encrypt failed")]
    Encrypt,
}

enum GcmCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl GcmCipher {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(GcmCipher::Aes128)
                .map_err(|_| CryptoError::InvalidKeyLength(key.len())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(GcmCipher::Aes256)
                .map_err(|_| CryptoError::InvalidKeyLength(key.len())),
            other => Err(CryptoError::InvalidKeyLength(other)),
        }
    }
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = GcmCipher::new(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ciphertext = match &cipher {
        GcmCipher::Aes128(c) => c.encrypt(&nonce, payload),
        GcmCipher::Aes256(c) => c.encrypt(&nonce, payload),
    }
    .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a blob produced by [`encrypt`] with the same key and `aad`.
pub fn decrypt(sealed: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(sealed.len()));
    }
    let cipher = GcmCipher::new(key)?;
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let plaintext = match &cipher {
        GcmCipher::Aes128(c) => c.decrypt(nonce, payload),
        GcmCipher::Aes256(c) => c.decrypt(nonce, payload),
    };
    plaintext.map_err(|_| CryptoError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_both_key_sizes() {
        for len in [16usize, 32] {
            let key = vec![7u8; len];
            let sealed = encrypt(b"secret", &key, b"keychain").expect("encrypt");
            assert_eq!(sealed.len(), NONCE_LEN + b"secret".len() + TAG_LEN);
            let plain = decrypt(&sealed, &key, b"keychain").expect("decrypt");
            assert_eq!(plain, b"secret");
        }
    }

    #[test]
    fn wrong_key_or_aad_fails_authentication() {
        let sealed = encrypt(b"secret", &[1u8; 32], b"one").expect("encrypt");
        assert_eq!(
            decrypt(&sealed, &[2u8; 32], b"one"),
            Err(CryptoError::AuthenticationFailure)
        );
        assert_eq!(
            decrypt(&sealed, &[1u8; 32], b"two"),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let mut sealed = encrypt(b"secret", &[1u8; 32], b"aad").expect("encrypt");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(
            decrypt(&sealed, &[1u8; 32], b"aad"),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn rejects_unsupported_key_length_and_short_input() {
        assert_eq!(
            encrypt(b"x", &[0u8; 24], b""),
            Err(CryptoError::InvalidKeyLength(24))
        );
        assert_eq!(
            decrypt(&[0u8; 4], &[0u8; 32], b""),
            Err(CryptoError::Truncated(4))
        );
    }
}
