//! In-memory storage backend for tests and ephemeral instances.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::space::Space;

use super::StorageBackend;

/// `HashMap`-per-space backend. No durability; bucketing is not supported,
/// so instances configured with a non-zero bucket depth must be rejected.
#[derive(Debug, Default)]
pub struct MemBackend {
    spaces: Mutex<HashMap<Space, HashMap<String, Vec<u8>>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemBackend {
    async fn read(&self, space: Space, key: &str) -> Result<Option<Vec<u8>>> {
        let spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(spaces.get(&space).and_then(|m| m.get(key)).cloned())
    }

    async fn put_new(&self, space: Space, key: &str, bytes: &[u8]) -> Result<bool> {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        let map = spaces.entry(space).or_default();
        if map.contains_key(key) {
            Ok(false)
        } else {
            map.insert(key.to_string(), bytes.to_vec());
            Ok(true)
        }
    }

    async fn put(&self, space: Space, key: &str, bytes: &[u8]) -> Result<()> {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        spaces
            .entry(space)
            .or_default()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, space: Space, key: &str) -> Result<bool> {
        let spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(spaces.get(&space).is_some_and(|m| m.contains_key(key)))
    }

    async fn delete(&self, space: Space, key: &str) -> Result<bool> {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(spaces
            .get_mut(&space)
            .is_some_and(|m| m.remove(key).is_some()))
    }

    async fn list(&self, space: Space) -> Result<Vec<String>> {
        let spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = spaces
            .get(&space)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let mut spaces = self.spaces.lock().unwrap_or_else(|e| e.into_inner());
        spaces.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_new_then_read() {
        let backend = MemBackend::new();
        assert!(backend
            .put_new(Space::Objects, "k", b"v")
            .await
            .expect("create"));
        assert!(!backend
            .put_new(Space::Objects, "k", b"w")
            .await
            .expect("exists"));
        let got = backend.read(Space::Objects, "k").await.expect("read");
        assert_eq!(got.as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test]
    async fn spaces_are_isolated() {
        let backend = MemBackend::new();
        backend.put(Space::Objects, "k", b"o").await.expect("put");
        backend.put(Space::Private, "k", b"p").await.expect("put");
        assert_eq!(
            backend
                .read(Space::Objects, "k")
                .await
                .expect("read")
                .as_deref(),
            Some(&b"o"[..])
        );
        assert_eq!(
            backend
                .read(Space::Private, "k")
                .await
                .expect("read")
                .as_deref(),
            Some(&b"p"[..])
        );
    }

    #[tokio::test]
    async fn bucketing_is_unsupported() {
        let backend = MemBackend::new();
        assert!(!backend.supports_subdir_bucketing());
    }
}
