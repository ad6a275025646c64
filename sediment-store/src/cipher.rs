//! At-rest encryption primitive.
//!
//! XChaCha20-Poly1305 with a key derived from the configured secret. Each
//! encrypted record is `nonce(24) || ciphertext`; the nonce is random per
//! write, so re-encrypting the same plaintext yields different bytes;
//! write-once comparisons therefore always happen on plaintext.

use core::fmt;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// Domain separator for key derivation. Changing it invalidates every store.
const KEY_CONTEXT: &[u8] = b"sediment.storage-key.v1";

const NONCE_LEN: usize = 24;

/// Symmetric cipher for one storage key.
#[derive(Clone)]
pub struct Cipher {
    aead: XChaCha20Poly1305,
}

impl Cipher {
    /// Derive the storage key from secret material.
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();
        let key = Key::from_slice(&digest);
        Self {
            aead: XChaCha20Poly1305::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext =
            self.aead
                .encrypt(&nonce, plaintext)
                .map_err(|_| StoreError::CipherFailure {
                    reason: "AEAD encryption failed".to_string(),
                })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext` record. Returns `None` on any
    /// authentication or framing failure; the caller attaches space/key
    /// context.
    pub fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return None;
        }
        let nonce = XNonce::from_slice(&data[..NONCE_LEN]);
        self.aead.decrypt(nonce, &data[NONCE_LEN..]).ok()
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose key material.
        f.write_str("Cipher(..)")
    }
}
