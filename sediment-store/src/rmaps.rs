//! Reverse-map indexing and queries.
//!
//! For every outbound reference of a just-persisted object the indexer
//! appends the referencing object's hash to the append-only set at
//! `{targetHash}.Object.{referencingType}` (or `.IdObject.` for identity
//! references). Appends are idempotent under a per-key mutex; sets are
//! newline-delimited, one hash per line.
//!
//! Emission is filtered by instance configuration: only (referencing type →
//! target types) pairs that are enabled produce entries.

use std::collections::HashMap;

use tracing::debug;

use sediment_core::{peek_type_name, Hash, IdHash, ObjectValue, Reference, TypeSet};

use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::space::Space;

/// Which (referencing type → target types) pairs produce reverse maps.
#[derive(Debug, Clone, Default)]
pub struct ReverseMapConfig {
    /// Pairs for plain object references.
    pub object_maps: HashMap<String, TypeSet>,
    /// Pairs for identity references.
    pub id_maps: HashMap<String, TypeSet>,
}

impl ReverseMapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable object-reference maps for a referencing type.
    pub fn enable_objects(mut self, referencing_type: &str, targets: TypeSet) -> Self {
        self.object_maps.insert(referencing_type.to_string(), targets);
        self
    }

    /// Enable identity-reference maps for a referencing type.
    pub fn enable_id_objects(mut self, referencing_type: &str, targets: TypeSet) -> Self {
        self.id_maps.insert(referencing_type.to_string(), targets);
        self
    }
}

/// The target side of a reverse-map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmapTarget {
    Object(Hash),
    Id(IdHash),
}

impl RmapTarget {
    /// The storage key of this target's map for one referencing type.
    pub fn key(&self, referencing_type: &str) -> String {
        match self {
            RmapTarget::Object(h) => format!("{h}.Object.{referencing_type}"),
            RmapTarget::Id(i) => format!("{i}.IdObject.{referencing_type}"),
        }
    }
}

impl Repository {
    /// Emit reverse-map edges for every enabled outbound reference of a
    /// just-persisted object. Called before the store reports success.
    pub(crate) async fn emit_reverse_maps(
        &self,
        obj: &ObjectValue,
        referencing_hash: Hash,
    ) -> Result<()> {
        let references = obj.references();
        if references.is_empty() {
            return Ok(());
        }
        for reference in references {
            match reference {
                Reference::Object(target) => {
                    let Some(targets) = self.rmap_config.object_maps.get(&obj.type_name) else {
                        continue;
                    };
                    if !self.object_target_enabled(targets, &target).await? {
                        continue;
                    }
                    let key = RmapTarget::Object(target).key(&obj.type_name);
                    self.append_rmap(&key, referencing_hash).await?;
                }
                Reference::Id(target) => {
                    let Some(targets) = self.rmap_config.id_maps.get(&obj.type_name) else {
                        continue;
                    };
                    if !self.id_target_enabled(targets, &target).await? {
                        continue;
                    }
                    let key = RmapTarget::Id(target).key(&obj.type_name);
                    self.append_rmap(&key, referencing_hash).await?;
                }
                // Streams carry no type; they are not reverse-mapped.
                Reference::Clob(_) | Reference::Blob(_) => {}
            }
        }
        Ok(())
    }

    /// All referencing hashes recorded for a target. An absent map reads as
    /// empty.
    pub async fn all_entries(
        &self,
        target: RmapTarget,
        referencing_type: &str,
    ) -> Result<Vec<Hash>> {
        let _op = self.gate.begin()?;
        let key = target.key(referencing_type);
        let Some(bytes) = self.backend.read(Space::Rmaps, &key).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
            space: Space::Rmaps,
            key: key.clone(),
            reason: "reverse map is not UTF-8".to_string(),
        })?;
        let mut out = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let hash = line.parse::<Hash>().map_err(|_| StoreError::Corrupt {
                space: Space::Rmaps,
                key: key.clone(),
                reason: format!("'{line}' is not a hash"),
            })?;
            out.push(hash);
        }
        Ok(out)
    }

    /// For each distinct identity among the referencing objects, keep only
    /// the hash that is the identity's current head version. Referencing
    /// objects of unversioned types have no notion of "latest" and are
    /// dropped.
    pub async fn only_latest_referencing(
        &self,
        target: RmapTarget,
        referencing_type: &str,
    ) -> Result<Vec<Hash>> {
        let _op = self.gate.begin()?;
        let entries = self.all_entries(target, referencing_type).await?;
        let mut out = Vec::new();
        for hash in entries {
            let Some(id_hash) = self.id_hash_of(hash).await? else {
                continue;
            };
            let Some(head) = self.read_head(&id_hash).await? else {
                continue;
            };
            let node = self.load_version_node(head).await?;
            if node.data() == hash {
                out.push(hash);
            }
        }
        Ok(out)
    }

    /// Whether an object reference target passes the enabled-targets filter.
    /// Wildcard sets skip the target read entirely.
    async fn object_target_enabled(&self, targets: &TypeSet, target: &Hash) -> Result<bool> {
        if matches!(targets, TypeSet::Any) {
            return Ok(true);
        }
        let type_name = self.target_type_name(&target.to_hex()).await?;
        Ok(targets.allows(&type_name))
    }

    async fn id_target_enabled(&self, targets: &TypeSet, target: &IdHash) -> Result<bool> {
        if matches!(targets, TypeSet::Any) {
            return Ok(true);
        }
        let type_name = self.target_type_name(&target.to_hex()).await?;
        Ok(targets.allows(&type_name))
    }

    /// Read the type discriminator of a stored target record. A referenced
    /// record must already be persisted; anything else is a dangling
    /// reference.
    async fn target_type_name(&self, key: &str) -> Result<String> {
        let bytes = self
            .backend
            .read(Space::Objects, key)
            .await?
            .ok_or_else(|| StoreError::FileNotFound {
                space: Space::Objects,
                key: key.to_string(),
            })?;
        let text = String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
            space: Space::Objects,
            key: key.to_string(),
            reason: "reference target is not microdata".to_string(),
        })?;
        match peek_type_name(&text) {
            Some((name, _)) => Ok(name),
            None => Err(StoreError::Corrupt {
                space: Space::Objects,
                key: key.to_string(),
                reason: "reference target is not microdata".to_string(),
            }),
        }
    }

    /// Append one hash to a reverse map, suppressing duplicates. Serialized
    /// per key; maps for different targets proceed in parallel.
    async fn append_rmap(&self, key: &str, referencing_hash: Hash) -> Result<()> {
        let key_owned = key.to_string();
        let _guard = self.rmap_locks.lock(&key_owned).await;

        let hex = referencing_hash.to_hex();
        let existing = self.backend.read(Space::Rmaps, key).await?;
        let mut content = match existing {
            Some(bytes) => String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
                space: Space::Rmaps,
                key: key.to_string(),
                reason: "reverse map is not UTF-8".to_string(),
            })?,
            None => String::new(),
        };
        if content.lines().any(|line| line == hex) {
            return Ok(());
        }
        content.push_str(&hex);
        content.push('\n');
        self.backend
            .put(Space::Rmaps, key, content.as_bytes())
            .await?;
        debug!(key, referencing = %referencing_hash, "appended reverse-map entry");
        Ok(())
    }
}
