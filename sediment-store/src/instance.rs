//! Instance lifecycle: configuration, open, close, rekey, settings.
//!
//! An [`Instance`] owns one storage directory (or injected backend), the
//! recipe registry with the built-in version-node recipes installed, and the
//! repository. `close` drains in-flight operations before releasing the
//! backend; operations started afterwards fail with `StorageClosed`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use sediment_core::{Recipe, RecipeRegistry, TypeSet};

use crate::backend::{EncryptedBackend, FsBackend, MemBackend, StorageBackend};
use crate::cipher::Cipher;
use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::rmaps::ReverseMapConfig;
use crate::space::Space;
use crate::version::version_recipes;

/// Instance configuration.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Root directory of the storage spaces (filesystem instances).
    pub directory: PathBuf,
    /// Delete all contents of the instance directory before opening.
    pub wipe_storage: bool,
    /// Encrypt `objects`, `vheads`, and `rmaps` (the `private` space is
    /// always encrypted when a secret is configured).
    pub encrypt_storage: bool,
    /// Secret material the at-rest key is derived from.
    pub secret_for_storage: Option<String>,
    /// Bucket depth for `objects/`; backends that cannot honour it reject
    /// non-zero values.
    pub n_hash_chars_for_subdirs: usize,
    /// Enabled (referencing type → target types) pairs for object references.
    pub enabled_reverse_map_types: HashMap<String, TypeSet>,
    /// Enabled pairs for identity references.
    pub enabled_reverse_map_types_for_id_objects: HashMap<String, TypeSet>,
    /// Recipes to install at init, after the built-ins.
    pub initial_recipes: Vec<Recipe>,
    /// Upper bound for opening the underlying storage.
    pub storage_init_timeout: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("sediment-data"),
            wipe_storage: false,
            encrypt_storage: false,
            secret_for_storage: None,
            n_hash_chars_for_subdirs: 0,
            enabled_reverse_map_types: HashMap::new(),
            enabled_reverse_map_types_for_id_objects: HashMap::new(),
            initial_recipes: Vec::new(),
            storage_init_timeout: Duration::from_secs(10),
        }
    }
}

impl InstanceConfig {
    pub fn at(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

/// One open store.
pub struct Instance {
    registry: Arc<RecipeRegistry>,
    repository: Arc<Repository>,
    encrypted: Option<Arc<EncryptedBackend>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl Instance {
    /// Open a filesystem-backed instance.
    pub async fn open(config: InstanceConfig) -> Result<Instance> {
        if config.wipe_storage {
            FsBackend::wipe(&config.directory).await?;
        }
        let timeout = config.storage_init_timeout;
        let backend = tokio::time::timeout(
            timeout,
            FsBackend::open(&config.directory, config.n_hash_chars_for_subdirs),
        )
        .await
        .map_err(|_| StoreError::InitTimeout(timeout))??;
        Self::open_with_backend(Arc::new(backend), config).await
    }

    /// Open over an injected backend (tests, ephemeral stores).
    pub async fn open_with_backend(
        backend: Arc<dyn StorageBackend>,
        config: InstanceConfig,
    ) -> Result<Instance> {
        if config.encrypt_storage && config.secret_for_storage.is_none() {
            return Err(StoreError::InvalidConfig {
                reason: "encrypt_storage requires secret_for_storage".to_string(),
            });
        }
        if config.n_hash_chars_for_subdirs > 0 && !backend.supports_subdir_bucketing() {
            return Err(StoreError::InvalidConfig {
                reason: "backend does not support subdirectory bucketing".to_string(),
            });
        }
        if config.wipe_storage {
            backend.clear().await?;
        }

        let (storage, encrypted): (Arc<dyn StorageBackend>, Option<Arc<EncryptedBackend>>) =
            match &config.secret_for_storage {
                Some(secret) => {
                    let wrapper = Arc::new(EncryptedBackend::new(
                        backend,
                        Cipher::from_secret(secret),
                        config.encrypt_storage,
                    ));
                    (wrapper.clone(), Some(wrapper))
                }
                None => (backend, None),
            };

        let registry = Arc::new(RecipeRegistry::new());
        for recipe in version_recipes() {
            registry.register(recipe)?;
        }
        for recipe in config.initial_recipes {
            registry.register(recipe)?;
        }

        let rmap_config = ReverseMapConfig {
            object_maps: config.enabled_reverse_map_types,
            id_maps: config.enabled_reverse_map_types_for_id_objects,
        };
        let repository = Arc::new(Repository::new(storage, registry.clone(), rmap_config));

        info!(
            directory = %config.directory.display(),
            encrypted = encrypted.is_some(),
            "opened instance"
        );
        Ok(Instance {
            registry,
            repository,
            encrypted,
        })
    }

    pub fn registry(&self) -> &Arc<RecipeRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Install a recipe after open.
    pub fn register_recipe(&self, recipe: Recipe) -> Result<()> {
        Ok(self.registry.register(recipe)?)
    }

    /// Store a JSON-serializable setting in the private space.
    pub async fn set_setting<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::InvalidConfig {
            reason: format!("setting '{key}' is not serializable: {e}"),
        })?;
        self.repository
            .backend
            .put(Space::Private, key, &bytes)
            .await
    }

    /// Read a setting back. `Ok(None)` if it was never written.
    pub async fn get_setting<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        let Some(bytes) = self.repository.backend.read(Space::Private, key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|_| StoreError::Corrupt {
            space: Space::Private,
            key: key.to_string(),
            reason: "setting is not valid JSON".to_string(),
        })?;
        Ok(Some(value))
    }

    /// Derive a new storage key from `new_secret` and re-encrypt every
    /// encrypted record. Only valid on encrypted instances.
    pub async fn rekey(&self, new_secret: &str) -> Result<()> {
        let Some(encrypted) = &self.encrypted else {
            return Err(StoreError::InvalidConfig {
                reason: "rekey requires an encrypted instance".to_string(),
            });
        };
        encrypted.rekey(Cipher::from_secret(new_secret)).await?;
        info!("storage rekeyed");
        Ok(())
    }

    /// Stop accepting operations, wait for in-flight ones, release the
    /// backend.
    pub async fn close(self) {
        self.repository.gate.close().await;
        info!("instance closed");
    }
}

/// Convenience constructor for an ephemeral in-memory instance.
pub async fn open_in_memory(config: InstanceConfig) -> Result<Instance> {
    Instance::open_with_backend(Arc::new(MemBackend::new()), config).await
}
