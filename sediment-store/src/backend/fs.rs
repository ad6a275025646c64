//! Filesystem storage backend.
//!
//! Layout: `{root}/{space}/{key}`, with optional hash-prefix bucketing under
//! `objects/` (`objects/{key[..n]}/{key}`). Replacing writes go through a
//! `.tmp` sibling plus rename so readers never observe partial contents.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, StoreError};
use crate::space::Space;

use super::StorageBackend;

/// File-per-record backend rooted at an instance directory.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    bucket_chars: usize,
}

impl FsBackend {
    /// Open (creating if necessary) the space directories under `root`.
    pub async fn open(root: impl AsRef<Path>, bucket_chars: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for space in Space::ALL {
            tokio::fs::create_dir_all(root.join(space.dir_name())).await?;
        }
        Ok(Self { root, bucket_chars })
    }

    /// Delete the whole instance directory, ignoring its absence.
    pub async fn wipe(root: impl AsRef<Path>) -> Result<()> {
        match tokio::fs::remove_dir_all(root.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, space: Space, key: &str) -> PathBuf {
        let dir = self.root.join(space.dir_name());
        // Only hash-shaped object keys are bucketed; everything else is flat.
        if space == Space::Objects && self.bucket_chars > 0 && key.len() > self.bucket_chars {
            dir.join(&key[..self.bucket_chars]).join(key)
        } else {
            dir.join(key)
        }
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn read(&self, space: Space, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(space, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_new(&self, space: Space, key: &str, bytes: &[u8]) -> Result<bool> {
        let path = self.path_for(space, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // create_new makes the existence check and the creation one atomic
        // step, so two racing writers of the same hash cannot interleave.
        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match open {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, space: Space, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(space, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StoreError::InvalidConfig {
                reason: format!("invalid storage key '{key}'"),
            })?;
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn exists(&self, space: Space, key: &str) -> Result<bool> {
        match tokio::fs::metadata(self.path_for(space, key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, space: Space, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(space, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, space: Space) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.join(space.dir_name())];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !name.ends_with(".tmp") {
                        out.push(name);
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn clear(&self) -> Result<()> {
        for space in Space::ALL {
            let dir = self.root.join(space.dir_name());
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    fn supports_subdir_bucketing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp(bucket_chars: usize) -> (tempfile::TempDir, FsBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FsBackend::open(dir.path(), bucket_chars).await.expect("open");
        (dir, backend)
    }

    #[tokio::test]
    async fn read_absent_is_none() {
        let (_dir, backend) = open_temp(0).await;
        let got = backend.read(Space::Objects, "missing").await.expect("read");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn put_new_is_create_only() {
        let (_dir, backend) = open_temp(0).await;
        assert!(backend
            .put_new(Space::Objects, "k", b"first")
            .await
            .expect("create"));
        assert!(!backend
            .put_new(Space::Objects, "k", b"second")
            .await
            .expect("no overwrite"));
        let got = backend.read(Space::Objects, "k").await.expect("read");
        assert_eq!(got.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn put_replaces() {
        let (_dir, backend) = open_temp(0).await;
        backend.put(Space::Vheads, "h", b"one").await.expect("put");
        backend.put(Space::Vheads, "h", b"two").await.expect("put");
        let got = backend.read(Space::Vheads, "h").await.expect("read");
        assert_eq!(got.as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn bucketing_keeps_logical_keys() {
        let (dir, backend) = open_temp(2).await;
        let key = "abcdef0123456789";
        backend
            .put_new(Space::Objects, key, b"x")
            .await
            .expect("create");
        assert!(dir.path().join("objects").join("ab").join(key).exists());

        // The logical key is unchanged by bucketing.
        assert!(backend.exists(Space::Objects, key).await.expect("exists"));
        let listed = backend.list(Space::Objects).await.expect("list");
        assert_eq!(listed, vec![key.to_string()]);
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_tmp() {
        let (dir, backend) = open_temp(0).await;
        backend.put(Space::Rmaps, "b", b"2").await.expect("put");
        backend.put(Space::Rmaps, "a", b"1").await.expect("put");
        std::fs::write(dir.path().join("rmaps").join("c.tmp"), b"junk").expect("tmp");
        let listed = backend.list(Space::Rmaps).await.expect("list");
        assert_eq!(listed, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn clear_empties_all_spaces() {
        let (_dir, backend) = open_temp(0).await;
        backend.put(Space::Private, "s", b"v").await.expect("put");
        backend.put(Space::Objects, "o", b"v").await.expect("put");
        backend.clear().await.expect("clear");
        assert!(!backend.exists(Space::Private, "s").await.expect("exists"));
        assert!(!backend.exists(Space::Objects, "o").await.expect("exists"));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (_dir, backend) = open_temp(0).await;
        backend.put(Space::Objects, "k", b"v").await.expect("put");
        assert!(backend.delete(Space::Objects, "k").await.expect("delete"));
        assert!(!backend.delete(Space::Objects, "k").await.expect("delete"));
    }
}
