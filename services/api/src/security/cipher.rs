//! services/api/src/security/cipher.rs
//!
//! Reversible email storage plus the deterministic lookup key.
//!
//! Emails are stored two ways: an AES-256-GCM ciphertext (random nonce, so
//! two encryptions of the same address differ) used only when composing
//! outgoing mail, and a keyed digest of the normalized address that is
//! deterministic and therefore indexable for duplicate checks. Finding a user
//! by plaintext email never requires decrypting the table.

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, Key, KeyInit, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dailylit_core::ports::{PortError, PortResult};
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct EmailCipher {
    cipher: Aes256Gcm,
    lookup_key: [u8; 32],
}

impl EmailCipher {
    /// Derives the encryption key and the lookup key from the master secret.
    pub fn new(secret: &str) -> Self {
        let enc_key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&enc_key));

        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b"email-lookup");
        let lookup_key: [u8; 32] = hasher.finalize().into();

        Self { cipher, lookup_key }
    }

    /// Lowercased, trimmed form used for both hashing and encryption.
    pub fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Deterministic, non-reversible key for ownership checks. Indexed in the
    /// users table with a unique constraint.
    pub fn lookup_key(&self, email: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.lookup_key);
        hasher.update([0u8]);
        hasher.update(Self::normalize(email).as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Encrypts an email for storage. Output is `b64(nonce || ciphertext)`.
    pub fn encrypt_email(&self, email: &str) -> PortResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Self::normalize(email).as_bytes())
            .map_err(|_| PortError::Unexpected("email encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Recovers the plaintext address. Failure here means the row cannot be
    /// mailed; dispatch treats it as a per-subscription skip.
    pub fn decrypt_email(&self, stored: &str) -> PortResult<String> {
        let blob = URL_SAFE_NO_PAD
            .decode(stored)
            .map_err(|_| PortError::Unexpected("stored email is not valid base64".to_string()))?;
        if blob.len() <= NONCE_LEN {
            return Err(PortError::Unexpected(
                "stored email ciphertext is truncated".to_string(),
            ));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PortError::Unexpected("email decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| PortError::Unexpected("decrypted email is not UTF-8".to_string()))
    }
}
