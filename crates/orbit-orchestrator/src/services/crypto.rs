//! Installation-token sealing: AES-256-GCM, `base64(nonce || ciphertext)`.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use orbit_core::settings::EncryptionKey;
use orbit_core::{OrbitError, Result};

const NONCE_SIZE: usize = 12;

pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| OrbitError::crypto(format!("unusable encryption key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Seal a plaintext token. A fresh nonce is drawn per seal, so equal
    /// plaintexts produce different blobs.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| OrbitError::crypto("token seal failed"))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Open a sealed token. Any malformed or tampered blob is
    /// `CRYPTO_ERROR` (non-retryable).
    pub fn open(&self, sealed: &str) -> Result<String> {
        let blob = BASE64
            .decode(sealed.trim())
            .map_err(|_| OrbitError::crypto("sealed token is not base64"))?;
        if blob.len() <= NONCE_SIZE {
            return Err(OrbitError::crypto("sealed token too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| OrbitError::crypto("token unseal failed"))?;
        String::from_utf8(plaintext).map_err(|_| OrbitError::crypto("token is not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&EncryptionKey([9u8; 32])).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let cipher = cipher();
        let sealed = cipher.seal("ghs_sensitive").unwrap();
        assert_ne!(sealed, "ghs_sensitive");
        assert_eq!(cipher.open(&sealed).unwrap(), "ghs_sensitive");
    }

    #[test]
    fn nonces_differ_per_seal() {
        let cipher = cipher();
        let a = cipher.seal("same").unwrap();
        let b = cipher.seal("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_blob_is_crypto_error() {
        let cipher = cipher();
        let mut sealed = cipher.seal("ghs_x").unwrap();
        sealed.replace_range(4..8, "AAAA");
        let err = cipher.open(&sealed).unwrap_err();
        assert_eq!(err.kind, orbit_core::ErrorKind::CryptoError);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = cipher().seal("ghs_x").unwrap();
        let other = TokenCipher::new(&EncryptionKey([1u8; 32])).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn garbage_is_crypto_error() {
        assert_eq!(
            cipher().open("!!").unwrap_err().kind,
            orbit_core::ErrorKind::CryptoError
        );
    }
}
