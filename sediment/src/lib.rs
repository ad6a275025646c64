//! # Sediment
//!
//! **A content-addressed object store for typed records: canonical microdata
//! serialization, SHA-256 identity, per-identity version DAGs, and reverse
//! reference maps.**
//!
//! Every object is identified by the SHA-256 of its canonical textual
//! serialization; versioned objects additionally carry an identity hash
//! derived from their identity-marked fields. Stored objects are immutable;
//! identities evolve by appending version nodes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sediment::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> sediment::Result<()> {
//!     let instance = Instance::open(InstanceConfig::at("./data")).await?;
//!     instance.register_recipe(Recipe::new(
//!         "Person",
//!         vec![Rule::new("email", ValueType::string()).id()],
//!     ))?;
//!
//!     let person = ObjectValue::new("Person")
//!         .with("email", Value::String("a@b".into()));
//!     let stored = instance
//!         .repository()
//!         .store_versioned(&person, StoreAs::Change)
//!         .await?;
//!     println!("{} @ {}", stored.hash, stored.id_hash);
//!
//!     instance.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Crate Structure
//!
//! - [`sediment_core`]: recipes, canonical microdata codec, hashing (pure)
//! - [`sediment_store`]: storage backends, repository, version DAGs,
//!   reverse maps, implode/explode (async)

#![forbid(unsafe_code)]

// Re-export sub-crates
pub use sediment_core as core;
pub use sediment_store as store;

// Re-export commonly used items at the top level
pub use sediment_core::{
    from_microdata, hash_object, id_hash_object, to_id_microdata, to_microdata, CoreError, Hash,
    IdHash, ObjectValue, Recipe, RecipeRegistry, Reference, Rule, TypeSet, Value, ValueType,
};

pub use sediment_store::{
    open_in_memory, ExplodeResult, Instance, InstanceConfig, Repository, RmapTarget, Status,
    StoreAs, StoreError, VersionNode,
};

/// Result type of the store surface.
pub type Result<T> = sediment_store::Result<T>;

/// Prelude module for convenient imports
///
/// ```rust,ignore
/// use sediment::prelude::*;
/// ```
pub mod prelude {
    pub use sediment_core::prelude::*;
    pub use sediment_store::prelude::*;
}
