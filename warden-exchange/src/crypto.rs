//! Attachment encryption
//!
//! XChaCha20-Poly1305 with the nonce prepended to the ciphertext. The key is
//! derived from the shared exchange password with BLAKE3.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use thiserror::Error;

pub const NONCE_SIZE: usize = 24;

const KDF_CONTEXT: &str = "warden exchange 2024-06 attachment key";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Seals and opens attachment payloads
#[derive(Clone)]
pub struct AttachmentCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for AttachmentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentCipher").finish_non_exhaustive()
    }
}

impl AttachmentCipher {
    pub fn from_password(password: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
        hasher.update(password.as_bytes());
        Self {
            key: *hasher.finalize().as_bytes(),
        }
    }

    /// Returns nonce || ciphertext
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_password_opens() {
        let sealed = AttachmentCipher::from_password("hunter2").encrypt(b"[\"free.?money\"]").unwrap();
        let opened = AttachmentCipher::from_password("hunter2").decrypt(&sealed).unwrap();
        assert_eq!(opened, b"[\"free.?money\"]");
        assert!(sealed.len() >= NONCE_SIZE + 16);
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = AttachmentCipher::from_password("a").encrypt(b"data").unwrap();
        assert_eq!(
            AttachmentCipher::from_password("b").decrypt(&sealed),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_truncated_input_fails() {
        let cipher = AttachmentCipher::from_password("a");
        assert!(cipher.decrypt(&[0u8; 10]).is_err());

        let mut sealed = cipher.encrypt(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(cipher.decrypt(&sealed).is_err());
    }
}
