//! Encrypting wrapper around any storage backend.
//!
//! The `private` space is always encrypted; the content spaces only when the
//! instance enables at-rest encryption. The cipher sits behind an async
//! RwLock so a rekey can re-encrypt every record exclusively while normal
//! operations keep taking cheap read locks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cipher::Cipher;
use crate::error::{Result, StoreError};
use crate::space::Space;

use super::StorageBackend;

pub struct EncryptedBackend {
    inner: Arc<dyn StorageBackend>,
    cipher: RwLock<Cipher>,
    encrypt_all: bool,
}

impl EncryptedBackend {
    /// Wrap `inner`. With `encrypt_all` every space is encrypted; otherwise
    /// only `private/`.
    pub fn new(inner: Arc<dyn StorageBackend>, cipher: Cipher, encrypt_all: bool) -> Self {
        Self {
            inner,
            cipher: RwLock::new(cipher),
            encrypt_all,
        }
    }

    fn encrypts(&self, space: Space) -> bool {
        self.encrypt_all || space == Space::Private
    }

    /// Re-encrypt every encrypted record under a new key, then swap keys.
    ///
    /// Holds the cipher write lock for the whole pass, so concurrent reads
    /// and writes wait rather than observing a half-rekeyed store.
    pub async fn rekey(&self, new_cipher: Cipher) -> Result<()> {
        let mut current = self.cipher.write().await;
        for space in Space::ALL {
            if !self.encrypts(space) {
                continue;
            }
            for key in self.inner.list(space).await? {
                let Some(stored) = self.inner.read(space, &key).await? else {
                    continue;
                };
                let plaintext =
                    current
                        .decrypt(&stored)
                        .ok_or_else(|| StoreError::DecryptionFailure {
                            space,
                            key: key.clone(),
                        })?;
                let reencrypted = new_cipher.encrypt(&plaintext)?;
                self.inner.put(space, &key, &reencrypted).await?;
            }
        }
        *current = new_cipher;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for EncryptedBackend {
    async fn read(&self, space: Space, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(stored) = self.inner.read(space, key).await? else {
            return Ok(None);
        };
        if !self.encrypts(space) {
            return Ok(Some(stored));
        }
        let cipher = self.cipher.read().await;
        match cipher.decrypt(&stored) {
            Some(plaintext) => Ok(Some(plaintext)),
            None => Err(StoreError::DecryptionFailure {
                space,
                key: key.to_string(),
            }),
        }
    }

    async fn put_new(&self, space: Space, key: &str, bytes: &[u8]) -> Result<bool> {
        if !self.encrypts(space) {
            return self.inner.put_new(space, key, bytes).await;
        }
        let encrypted = {
            let cipher = self.cipher.read().await;
            cipher.encrypt(bytes)?
        };
        self.inner.put_new(space, key, &encrypted).await
    }

    async fn put(&self, space: Space, key: &str, bytes: &[u8]) -> Result<()> {
        if !self.encrypts(space) {
            return self.inner.put(space, key, bytes).await;
        }
        let encrypted = {
            let cipher = self.cipher.read().await;
            cipher.encrypt(bytes)?
        };
        self.inner.put(space, key, &encrypted).await
    }

    async fn exists(&self, space: Space, key: &str) -> Result<bool> {
        self.inner.exists(space, key).await
    }

    async fn delete(&self, space: Space, key: &str) -> Result<bool> {
        self.inner.delete(space, key).await
    }

    async fn list(&self, space: Space) -> Result<Vec<String>> {
        self.inner.list(space).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn supports_subdir_bucketing(&self) -> bool {
        self.inner.supports_subdir_bucketing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackend;

    fn encrypted_all() -> EncryptedBackend {
        EncryptedBackend::new(
            Arc::new(MemBackend::new()),
            Cipher::from_secret("secret"),
            true,
        )
    }

    #[tokio::test]
    async fn round_trip_through_encryption() {
        let backend = encrypted_all();
        backend
            .put(Space::Objects, "k", b"plaintext")
            .await
            .expect("put");
        let got = backend.read(Space::Objects, "k").await.expect("read");
        assert_eq!(got.as_deref(), Some(&b"plaintext"[..]));
    }

    #[tokio::test]
    async fn stored_bytes_are_not_plaintext() {
        let inner = Arc::new(MemBackend::new());
        let backend =
            EncryptedBackend::new(inner.clone(), Cipher::from_secret("secret"), true);
        backend
            .put(Space::Objects, "k", b"plaintext")
            .await
            .expect("put");
        let raw = inner
            .read(Space::Objects, "k")
            .await
            .expect("read")
            .expect("present");
        assert_ne!(raw, b"plaintext");
    }

    #[tokio::test]
    async fn private_is_always_encrypted() {
        let inner = Arc::new(MemBackend::new());
        let backend =
            EncryptedBackend::new(inner.clone(), Cipher::from_secret("secret"), false);
        backend.put(Space::Private, "s", b"shh").await.expect("put");
        backend
            .put(Space::Objects, "o", b"open")
            .await
            .expect("put");

        let raw_private = inner
            .read(Space::Private, "s")
            .await
            .expect("read")
            .expect("present");
        assert_ne!(raw_private, b"shh");

        let raw_object = inner
            .read(Space::Objects, "o")
            .await
            .expect("read")
            .expect("present");
        assert_eq!(raw_object, b"open");
    }

    #[tokio::test]
    async fn wrong_key_fails_decryption() {
        let inner = Arc::new(MemBackend::new());
        {
            let backend =
                EncryptedBackend::new(inner.clone(), Cipher::from_secret("right"), true);
            backend.put(Space::Objects, "k", b"v").await.expect("put");
        }
        let backend = EncryptedBackend::new(inner, Cipher::from_secret("wrong"), true);
        let err = backend
            .read(Space::Objects, "k")
            .await
            .expect_err("must fail");
        assert_eq!(err.code(), "DecryptionFailure");
    }

    #[tokio::test]
    async fn rekey_re_encrypts_everything() {
        let inner = Arc::new(MemBackend::new());
        let backend =
            EncryptedBackend::new(inner.clone(), Cipher::from_secret("old"), true);
        backend.put(Space::Objects, "k", b"v").await.expect("put");
        backend.put(Space::Private, "s", b"w").await.expect("put");

        backend
            .rekey(Cipher::from_secret("new"))
            .await
            .expect("rekey");

        // Old handle (now carrying the new key) still reads everything.
        assert_eq!(
            backend
                .read(Space::Objects, "k")
                .await
                .expect("read")
                .as_deref(),
            Some(&b"v"[..])
        );

        // A fresh handle with the new secret works; the old secret does not.
        let fresh = EncryptedBackend::new(inner.clone(), Cipher::from_secret("new"), true);
        assert_eq!(
            fresh
                .read(Space::Private, "s")
                .await
                .expect("read")
                .as_deref(),
            Some(&b"w"[..])
        );
        let stale = EncryptedBackend::new(inner, Cipher::from_secret("old"), true);
        assert!(stale.read(Space::Objects, "k").await.is_err());
    }
}
