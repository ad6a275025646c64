//! Storage backends.
//!
//! The repository talks to a small async key/value facade over the four
//! logical spaces. Absence is `Ok(None)`, never an error: missing records
//! are an expected lookup outcome, and error variants are reserved for I/O and
//! integrity failures.

pub mod encrypted;
pub mod fs;
pub mod mem;

pub use encrypted::EncryptedBackend;
pub use fs::FsBackend;
pub use mem::MemBackend;

use async_trait::async_trait;

use crate::error::Result;
use crate::space::Space;

/// Async facade over the four storage spaces.
///
/// `put_new` is the write-once primitive: it must fail the creation (and
/// return `false`) when the key already exists, without touching the stored
/// bytes. `put` replaces atomically and is reserved for head pointers,
/// reverse maps, and private settings.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a record. `Ok(None)` if the key does not exist.
    async fn read(&self, space: Space, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create a record iff the key does not exist yet. Returns whether this
    /// call created it. Existing bytes are never overwritten.
    async fn put_new(&self, space: Space, key: &str, bytes: &[u8]) -> Result<bool>;

    /// Replace (or create) a record atomically.
    async fn put(&self, space: Space, key: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, space: Space, key: &str) -> Result<bool>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, space: Space, key: &str) -> Result<bool>;

    /// All keys of a space, sorted. Bucketing subdirectories are flattened.
    async fn list(&self, space: Space) -> Result<Vec<String>>;

    /// Remove every record in every space.
    async fn clear(&self) -> Result<()>;

    /// Whether this backend honours hash-prefix subdirectory bucketing.
    /// Backends that cannot must reject non-zero bucket depths at open.
    fn supports_subdir_bucketing(&self) -> bool {
        false
    }
}
