//! Error types for the storage layer.
//!
//! Codec and recipe failures bubble up unchanged from `sediment-core`;
//! everything the storage layer adds carries the space/key context of the
//! record involved. `FileNotFound` is a normal negative result for lookups;
//! `WriteOnceViolation` is a fatal integrity error. No retry happens here.

use std::time::Duration;

use thiserror::Error;

use sediment_core::{CoreError, Hash, IdHash};

use crate::space::Space;

/// Result type for sediment-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the repository, the version DAG, the reverse-map
/// indexer, and the storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Recipe or codec failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying I/O failure, surfaced verbatim.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The record does not exist. Normal negative result for lookups.
    #[error("{space}/{key} not found")]
    FileNotFound { space: Space, key: String },

    /// The key already holds different bytes. Fatal integrity error.
    #[error("write-once violation: {space}/{key} already holds different bytes")]
    WriteOnceViolation { space: Space, key: String },

    /// Versioned object handed to the unversioned API or vice versa.
    #[error("versioned/unversioned API mismatch for recipe '{name}'")]
    VersionedMismatch { name: String },

    /// A version node's `prev` does not resolve in-store.
    #[error("version node {node} has dangling prev {prev}")]
    DanglingPrev { node: Hash, prev: Hash },

    /// A version walk revisited a node.
    #[error("version walk for identity {id_hash} revisited a node")]
    VersionCycle { id_hash: IdHash },

    /// An inlined child re-hashed to something other than its wrapper claims.
    #[error("inlined content hashed to {actual}, wrapper declared {expected}")]
    ImplodeHashMismatch { expected: String, actual: String },

    /// Structurally malformed imploded microdata.
    #[error("malformed imploded microdata: {reason}")]
    InvalidImploded { reason: String },

    /// A stored record could not be interpreted.
    #[error("record {space}/{key} is corrupt: {reason}")]
    Corrupt {
        space: Space,
        key: String,
        reason: String,
    },

    /// At-rest decryption failed. Fatal for the current call.
    #[error("decryption failed for {space}/{key}")]
    DecryptionFailure { space: Space, key: String },

    /// AEAD encryption failed (plaintext too large for the cipher).
    #[error("encryption failure: {reason}")]
    CipherFailure { reason: String },

    /// The instance was closed; no further operations are accepted.
    #[error("storage is closed")]
    StorageClosed,

    /// Opening the underlying storage exceeded the configured timeout.
    #[error("storage initialisation timed out after {0:?}")]
    InitTimeout(Duration),

    /// Rejected instance configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl StoreError {
    /// Stable short code for this error, suitable for matching and logging.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Core(e) => e.code(),
            StoreError::Io(_) => "Io",
            StoreError::FileNotFound { .. } => "FileNotFound",
            StoreError::WriteOnceViolation { .. } => "WriteOnceViolation",
            StoreError::VersionedMismatch { .. } => "VersionedMismatch",
            StoreError::DanglingPrev { .. } => "DanglingPrev",
            StoreError::VersionCycle { .. } => "VersionCycle",
            StoreError::ImplodeHashMismatch { .. } => "ImplodeHashMismatch",
            StoreError::InvalidImploded { .. } => "InvalidImploded",
            StoreError::Corrupt { .. } => "CorruptRecord",
            StoreError::DecryptionFailure { .. } => "DecryptionFailure",
            StoreError::CipherFailure { .. } => "CipherFailure",
            StoreError::StorageClosed => "StorageClosed",
            StoreError::InitTimeout(_) => "InitTimeout",
            StoreError::InvalidConfig { .. } => "InvalidConfig",
        }
    }

    /// Whether this error is the normal negative result of a lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::FileNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_codes() {
        let e = StoreError::from(CoreError::TrailingData { offset: 7 });
        assert_eq!(e.code(), "TrailingData");
    }

    #[test]
    fn not_found_is_recognisable() {
        let e = StoreError::FileNotFound {
            space: Space::Objects,
            key: "abc".to_string(),
        };
        assert!(e.is_not_found());
        assert_eq!(e.code(), "FileNotFound");
    }
}
