//! The object repository.
//!
//! Stores and loads canonical microdata under hash-addressed keys, enforces
//! write-once semantics, maintains the per-identity version DAG, and emits
//! reverse-map edges for every stored object. Versioned writes serialize per
//! identity hash; unrelated identities proceed in parallel.
//!
//! Side-effect order of a versioned store: object file, id-object record,
//! version-node object, head pointer, reverse maps. The head pointer is
//! written only after the node it names, so a cancelled call can leave
//! orphaned object files but never a head naming a missing node, and the
//! reverse maps are written only once the head they describe is in place.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;
use tracing::debug;

use sediment_core::{
    from_microdata, id_hash_object, peek_type_name, to_id_microdata, to_microdata, Hash, IdHash,
    ObjectValue, RecipeRegistry,
};

use crate::backend::StorageBackend;
use crate::error::{Result, StoreError};
use crate::locks::{LockMap, OpGate};
use crate::rmaps::ReverseMapConfig;
use crate::space::Space;
use crate::version::{StoreAs, VersionNode};

/// Capacity of the object-hash → identity-hash cache.
const ID_CACHE_CAPACITY: usize = 1024;

/// Outcome of a write-once store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// This call created the record.
    New,
    /// The record already existed with identical bytes.
    Exists,
}

/// Result of storing an unversioned object, CLOB, or BLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    pub hash: Hash,
    pub status: Status,
}

/// Result of storing a versioned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedStoreResult {
    pub hash: Hash,
    pub id_hash: IdHash,
    pub status: Status,
    /// Milliseconds since the Unix epoch at commit time.
    pub timestamp: u64,
}

/// Result of allocating an identity without a payload version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdStoreResult {
    pub id_hash: IdHash,
    pub status: Status,
}

/// Hash-addressed object store over a [`StorageBackend`].
pub struct Repository {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) registry: Arc<RecipeRegistry>,
    pub(crate) rmap_config: ReverseMapConfig,
    pub(crate) id_locks: LockMap<IdHash>,
    pub(crate) rmap_locks: LockMap<String>,
    id_cache: StdMutex<LruCache<Hash, IdHash>>,
    pub(crate) gate: OpGate,
}

impl Repository {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<RecipeRegistry>,
        rmap_config: ReverseMapConfig,
    ) -> Self {
        let capacity = match NonZeroUsize::new(ID_CACHE_CAPACITY) {
            Some(capacity) => capacity,
            None => NonZeroUsize::MIN,
        };
        Self {
            backend,
            registry,
            rmap_config,
            id_locks: LockMap::new(),
            rmap_locks: LockMap::new(),
            id_cache: StdMutex::new(LruCache::new(capacity)),
            gate: OpGate::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RecipeRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Store operations
    // ------------------------------------------------------------------

    /// Store an unversioned object. Fails with `VersionedMismatch` for
    /// recipes carrying identity rules.
    pub async fn store_unversioned(&self, obj: &ObjectValue) -> Result<StoreResult> {
        let _op = self.gate.begin()?;
        let recipe = self.registry.lookup(&obj.type_name)?;
        if recipe.is_versioned() {
            return Err(StoreError::VersionedMismatch {
                name: obj.type_name.clone(),
            });
        }
        let md = to_microdata(&self.registry, obj)?;
        self.assert_round_trip(obj, &md);
        let hash = Hash::digest(md.as_bytes());

        let status = self
            .write_once(Space::Objects, &hash.to_hex(), md.as_bytes())
            .await?;
        self.emit_reverse_maps(obj, hash).await?;

        debug!(type_name = %obj.type_name, hash = %hash, status = ?status, "stored object");
        Ok(StoreResult { hash, status })
    }

    /// Store a new version of a versioned object and advance its DAG.
    pub async fn store_versioned(
        &self,
        obj: &ObjectValue,
        store_as: StoreAs,
    ) -> Result<VersionedStoreResult> {
        let _op = self.gate.begin()?;
        let recipe = self.registry.lookup(&obj.type_name)?;
        if !recipe.is_versioned() {
            return Err(StoreError::VersionedMismatch {
                name: obj.type_name.clone(),
            });
        }
        let id_md = to_id_microdata(&self.registry, obj)?;
        let id_hash = IdHash::digest(id_md.as_bytes());
        let md = to_microdata(&self.registry, obj)?;
        self.assert_round_trip(obj, &md);
        let hash = Hash::digest(md.as_bytes());

        let _id_guard = self.id_locks.lock(&id_hash).await;

        let status = self
            .write_once(Space::Objects, &hash.to_hex(), md.as_bytes())
            .await?;
        self.write_once(Space::Objects, &id_hash.to_hex(), id_md.as_bytes())
            .await?;

        let head = self.read_head(&id_hash).await?;
        let append = match (head, store_as) {
            (None, _) => Some(VersionNode::Edge { data: hash }),
            (Some(head_hash), StoreAs::Change) => Some(VersionNode::Change {
                data: hash,
                prev: head_hash,
            }),
            (Some(head_hash), StoreAs::Merge) => {
                if self.history_contains(&id_hash, head_hash, hash).await? {
                    None
                } else {
                    Some(VersionNode::Change {
                        data: hash,
                        prev: head_hash,
                    })
                }
            }
        };

        if let Some(node) = append {
            let node_obj = node.to_object();
            let node_md = to_microdata(&self.registry, &node_obj)?;
            let node_hash = Hash::digest(node_md.as_bytes());
            self.write_once(Space::Objects, &node_hash.to_hex(), node_md.as_bytes())
                .await?;
            let mut head_line = node_hash.to_hex();
            head_line.push('\n');
            self.backend
                .put(Space::Vheads, &id_hash.to_hex(), head_line.as_bytes())
                .await?;
        }

        // Reverse maps land after the head move and before success is
        // reported; a query that sees this call succeed sees its maps.
        self.emit_reverse_maps(obj, hash).await?;

        self.remember_id(hash, id_hash);
        let timestamp = now_millis();
        debug!(
            type_name = %obj.type_name,
            hash = %hash,
            id_hash = %id_hash,
            status = ?status,
            appended = append.is_some(),
            "stored versioned object"
        );
        Ok(VersionedStoreResult {
            hash,
            id_hash,
            status,
            timestamp,
        })
    }

    /// Persist only the identity record, allocating an identity without
    /// committing a payload version.
    pub async fn store_id_object(&self, obj: &ObjectValue) -> Result<IdStoreResult> {
        let _op = self.gate.begin()?;
        let recipe = self.registry.lookup(&obj.type_name)?;
        if !recipe.is_versioned() {
            return Err(StoreError::VersionedMismatch {
                name: obj.type_name.clone(),
            });
        }
        let id_md = to_id_microdata(&self.registry, obj)?;
        let id_hash = IdHash::digest(id_md.as_bytes());
        let status = self
            .write_once(Space::Objects, &id_hash.to_hex(), id_md.as_bytes())
            .await?;
        Ok(IdStoreResult { id_hash, status })
    }

    /// Store a UTF-8 character stream, addressed by the SHA-256 of its bytes.
    pub async fn store_clob(&self, text: &str) -> Result<StoreResult> {
        let _op = self.gate.begin()?;
        let hash = Hash::digest(text.as_bytes());
        let status = self
            .write_once(Space::Objects, &hash.to_hex(), text.as_bytes())
            .await?;
        Ok(StoreResult { hash, status })
    }

    /// Store an opaque byte stream, addressed by the SHA-256 of its bytes.
    pub async fn store_blob(&self, bytes: &[u8]) -> Result<StoreResult> {
        let _op = self.gate.begin()?;
        let hash = Hash::digest(bytes);
        let status = self
            .write_once(Space::Objects, &hash.to_hex(), bytes)
            .await?;
        Ok(StoreResult { hash, status })
    }

    // ------------------------------------------------------------------
    // Load operations
    // ------------------------------------------------------------------

    /// Load an object by content hash.
    pub async fn load_object(&self, hash: &Hash) -> Result<ObjectValue> {
        let _op = self.gate.begin()?;
        let text = self.read_object_text(hash).await?;
        let parsed = from_microdata(&self.registry, &text)?;
        Ok(parsed.object)
    }

    /// Load the identity record of an identity hash.
    pub async fn load_id_object(&self, id_hash: &IdHash) -> Result<ObjectValue> {
        let _op = self.gate.begin()?;
        let key = id_hash.to_hex();
        let text = self.read_text(Space::Objects, &key).await?;
        let parsed = from_microdata(&self.registry, &text)?;
        if !parsed.is_id_object {
            return Err(StoreError::Corrupt {
                space: Space::Objects,
                key,
                reason: "record is not an id object".to_string(),
            });
        }
        Ok(parsed.object)
    }

    /// Load the current version of an identity.
    pub async fn load_by_id(&self, id_hash: &IdHash) -> Result<ObjectValue> {
        let _op = self.gate.begin()?;
        let (_, node) = self.current_node(id_hash).await?;
        let text = self.read_object_text(&node.data()).await?;
        let parsed = from_microdata(&self.registry, &text)?;
        Ok(parsed.object)
    }

    /// Load the current version of the identity described by a partial
    /// object carrying (at least) the identity fields.
    pub async fn load_by_id_obj(&self, partial: &ObjectValue) -> Result<ObjectValue> {
        let id_hash = id_hash_object(&self.registry, partial)?;
        self.load_by_id(&id_hash).await
    }

    /// Load a CLOB as text.
    pub async fn load_clob(&self, hash: &Hash) -> Result<String> {
        let _op = self.gate.begin()?;
        self.read_text(Space::Objects, &hash.to_hex()).await
    }

    /// Load a BLOB as raw bytes.
    pub async fn load_blob(&self, hash: &Hash) -> Result<Vec<u8>> {
        let _op = self.gate.begin()?;
        self.read_required(Space::Objects, &hash.to_hex()).await
    }

    pub async fn exists(&self, hash: &Hash) -> Result<bool> {
        let _op = self.gate.begin()?;
        self.backend.exists(Space::Objects, &hash.to_hex()).await
    }

    /// Physically delete an object file. Explicit and exceptional: nothing
    /// else in the store removes data.
    pub async fn delete_object(&self, hash: &Hash) -> Result<bool> {
        let _op = self.gate.begin()?;
        let deleted = self.backend.delete(Space::Objects, &hash.to_hex()).await?;
        debug!(hash = %hash, deleted, "deleted object file");
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Version DAG reads
    // ------------------------------------------------------------------

    /// The newest version node of an identity.
    pub async fn current_version_node(&self, id_hash: &IdHash) -> Result<(Hash, VersionNode)> {
        let _op = self.gate.begin()?;
        self.current_node(id_hash).await
    }

    /// All version nodes of an identity, newest first, ending in the Edge.
    pub async fn all_version_nodes(&self, id_hash: &IdHash) -> Result<Vec<(Hash, VersionNode)>> {
        let _op = self.gate.begin()?;
        let head = self
            .read_head(id_hash)
            .await?
            .ok_or_else(|| StoreError::FileNotFound {
                space: Space::Vheads,
                key: id_hash.to_hex(),
            })?;
        self.walk_nodes(id_hash, head).await
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// Every hash-addressed record in the object space (objects, id
    /// records, CLOBs, BLOBs).
    pub async fn list_all_object_hashes(&self) -> Result<Vec<Hash>> {
        let _op = self.gate.begin()?;
        let keys = self.backend.list(Space::Objects).await?;
        Ok(keys.iter().filter_map(|k| k.parse().ok()).collect())
    }

    /// Every identity with a recorded head.
    pub async fn list_all_id_hashes(&self) -> Result<Vec<IdHash>> {
        let _op = self.gate.begin()?;
        let keys = self.backend.list(Space::Vheads).await?;
        Ok(keys.iter().filter_map(|k| k.parse().ok()).collect())
    }

    /// Hashes of all concrete objects of one type. Maintenance/test aid;
    /// this scans the whole object space.
    pub async fn list_objects_of_type(&self, type_name: &str) -> Result<Vec<Hash>> {
        let _op = self.gate.begin()?;
        let mut out = Vec::new();
        for key in self.backend.list(Space::Objects).await? {
            let Ok(hash) = key.parse::<Hash>() else {
                continue;
            };
            let Some(bytes) = self.backend.read(Space::Objects, &key).await? else {
                continue;
            };
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            if let Some((name, false)) = peek_type_name(&text) {
                if name == type_name {
                    out.push(hash);
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    pub(crate) async fn current_node(&self, id_hash: &IdHash) -> Result<(Hash, VersionNode)> {
        let head = self
            .read_head(id_hash)
            .await?
            .ok_or_else(|| StoreError::FileNotFound {
                space: Space::Vheads,
                key: id_hash.to_hex(),
            })?;
        let node = self.load_version_node(head).await?;
        Ok((head, node))
    }

    pub(crate) async fn read_head(&self, id_hash: &IdHash) -> Result<Option<Hash>> {
        let key = id_hash.to_hex();
        let Some(bytes) = self.backend.read(Space::Vheads, &key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
            space: Space::Vheads,
            key: key.clone(),
            reason: "head pointer is not UTF-8".to_string(),
        })?;
        let hash = text
            .trim_end()
            .parse::<Hash>()
            .map_err(|_| StoreError::Corrupt {
                space: Space::Vheads,
                key,
                reason: "head pointer is not a hash".to_string(),
            })?;
        Ok(Some(hash))
    }

    pub(crate) async fn load_version_node(&self, node_hash: Hash) -> Result<VersionNode> {
        let text = self.read_object_text(&node_hash).await?;
        let parsed = from_microdata(&self.registry, &text)?;
        VersionNode::from_object(&node_hash.to_hex(), &parsed.object)
    }

    async fn walk_nodes(
        &self,
        id_hash: &IdHash,
        head: Hash,
    ) -> Result<Vec<(Hash, VersionNode)>> {
        let mut out: Vec<(Hash, VersionNode)> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(head);
        while let Some(node_hash) = cursor {
            if !seen.insert(node_hash) {
                return Err(StoreError::VersionCycle { id_hash: *id_hash });
            }
            let node = match self.load_version_node(node_hash).await {
                Ok(node) => node,
                Err(e) if e.is_not_found() => {
                    let referrer = out.last().map(|(h, _)| *h).unwrap_or(node_hash);
                    return Err(StoreError::DanglingPrev {
                        node: referrer,
                        prev: node_hash,
                    });
                }
                Err(e) => return Err(e),
            };
            cursor = node.prev();
            out.push((node_hash, node));
        }
        Ok(out)
    }

    async fn history_contains(
        &self,
        id_hash: &IdHash,
        head: Hash,
        target: Hash,
    ) -> Result<bool> {
        let nodes = self.walk_nodes(id_hash, head).await?;
        Ok(nodes.iter().any(|(_, node)| node.data() == target))
    }

    /// The identity hash of a stored object, or `None` for unversioned
    /// types. Cached, since the mapping is immutable.
    pub(crate) async fn id_hash_of(&self, hash: Hash) -> Result<Option<IdHash>> {
        {
            let mut cache = self.id_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = cache.get(&hash) {
                return Ok(Some(*id));
            }
        }
        let text = self.read_object_text(&hash).await?;
        let parsed = from_microdata(&self.registry, &text)?;
        let recipe = self.registry.lookup(&parsed.object.type_name)?;
        if !recipe.is_versioned() {
            return Ok(None);
        }
        let id = id_hash_object(&self.registry, &parsed.object)?;
        self.remember_id(hash, id);
        Ok(Some(id))
    }

    fn remember_id(&self, hash: Hash, id_hash: IdHash) {
        let mut cache = self.id_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(hash, id_hash);
    }

    pub(crate) async fn read_object_text(&self, hash: &Hash) -> Result<String> {
        self.read_text(Space::Objects, &hash.to_hex()).await
    }

    async fn read_text(&self, space: Space, key: &str) -> Result<String> {
        let bytes = self.read_required(space, key).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
            space,
            key: key.to_string(),
            reason: "record is not UTF-8".to_string(),
        })
    }

    async fn read_required(&self, space: Space, key: &str) -> Result<Vec<u8>> {
        self.backend
            .read(space, key)
            .await?
            .ok_or_else(|| StoreError::FileNotFound {
                space,
                key: key.to_string(),
            })
    }

    /// Create-or-verify: identical bytes under an existing key are a no-op,
    /// different bytes are a fatal integrity error.
    pub(crate) async fn write_once(
        &self,
        space: Space,
        key: &str,
        bytes: &[u8],
    ) -> Result<Status> {
        if self.backend.put_new(space, key, bytes).await? {
            return Ok(Status::New);
        }
        match self.backend.read(space, key).await? {
            Some(existing) if existing == bytes => Ok(Status::Exists),
            Some(_) => Err(StoreError::WriteOnceViolation {
                space,
                key: key.to_string(),
            }),
            // Deleted between the failed create and the read; one retry.
            None => {
                if self.backend.put_new(space, key, bytes).await? {
                    Ok(Status::New)
                } else {
                    Ok(Status::Exists)
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn assert_round_trip(&self, obj: &ObjectValue, md: &str) {
        match from_microdata(&self.registry, md) {
            Ok(parsed) => debug_assert!(
                parsed.object.equivalent(obj),
                "canonical round-trip diverged for type {}",
                obj.type_name
            ),
            Err(e) => debug_assert!(false, "canonical serialization failed to reparse: {e}"),
        }
    }

    #[cfg(not(debug_assertions))]
    fn assert_round_trip(&self, _obj: &ObjectValue, _md: &str) {}
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackend;

    fn repo() -> Repository {
        Repository::new(
            Arc::new(MemBackend::new()),
            Arc::new(RecipeRegistry::new()),
            ReverseMapConfig::new(),
        )
    }

    #[tokio::test]
    async fn write_once_accepts_identical_bytes() {
        let repo = repo();
        let first = repo
            .write_once(Space::Objects, "k", b"bytes")
            .await
            .expect("first");
        assert_eq!(first, Status::New);
        let second = repo
            .write_once(Space::Objects, "k", b"bytes")
            .await
            .expect("second");
        assert_eq!(second, Status::Exists);
    }

    #[tokio::test]
    async fn write_once_rejects_differing_bytes() {
        let repo = repo();
        repo.write_once(Space::Objects, "k", b"original")
            .await
            .expect("first");
        let err = repo
            .write_once(Space::Objects, "k", b"different")
            .await
            .expect_err("must fail");
        assert_eq!(err.code(), "WriteOnceViolation");
    }

    #[tokio::test]
    async fn unknown_type_surfaces_from_store() {
        let repo = repo();
        let obj = ObjectValue::new("Unregistered");
        let err = repo.store_unversioned(&obj).await.expect_err("must fail");
        assert_eq!(err.code(), "UnknownType");
    }
}
