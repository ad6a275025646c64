//! # Sediment Core
//!
//! Recipes, canonical microdata codec, and content hashing for Sediment.
//!
//! This crate is the pure heart of the store: it knows nothing about disks
//! or tasks. It provides:
//! - Typed value trees and opaque hash references
//! - A recipe registry with eager rule-inheritance resolution
//! - The canonical microdata serializer and single-pass parser
//! - SHA-256 content and identity hashing over the canonical text
//!
//! Everything here is deterministic: the same (recipe, value) pair always
//! produces the same bytes, and therefore the same hash.

pub mod error;
pub mod hash;
pub mod json;
pub mod microdata;
pub mod recipe;
pub mod registry;
pub mod value;

pub use error::{CoreError, Result};
pub use hash::{is_hash_hex, Hash, IdHash, HASH_HEX_LEN};
pub use microdata::{
    escape, from_microdata, peek_type_name, to_id_microdata, to_microdata, unescape, ParsedObject,
    ITEMTYPE_PREFIX,
};
pub use recipe::{Recipe, Rule, StringRestriction, TypeSet, ValueType};
pub use registry::RecipeRegistry;
pub use value::{ObjectValue, Reference, Value};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::hash::{Hash, IdHash};
    pub use crate::recipe::{Recipe, Rule, TypeSet, ValueType};
    pub use crate::registry::RecipeRegistry;
    pub use crate::value::{ObjectValue, Reference, Value};
}

/// Serialize an object and hash the canonical text in one step.
pub fn hash_object(registry: &RecipeRegistry, obj: &value::ObjectValue) -> Result<Hash> {
    let md = microdata::to_microdata(registry, obj)?;
    Ok(Hash::digest(md.as_bytes()))
}

/// Serialize the identity form of an object and hash it in one step.
pub fn id_hash_object(registry: &RecipeRegistry, obj: &value::ObjectValue) -> Result<IdHash> {
    let md = microdata::to_id_microdata(registry, obj)?;
    Ok(IdHash::digest(md.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_hash_matches_hash_of_serialization() {
        let registry = RecipeRegistry::new();
        registry
            .register(Recipe::new(
                "Person",
                vec![Rule::new("email", ValueType::string()).id()],
            ))
            .expect("register");
        let obj = ObjectValue::new("Person").with("email", Value::String("a@b".into()));

        let md = to_microdata(&registry, &obj).expect("serialize");
        assert_eq!(
            hash_object(&registry, &obj).expect("hash"),
            Hash::digest(md.as_bytes())
        );

        let id_md = to_id_microdata(&registry, &obj).expect("serialize id");
        assert_eq!(
            id_hash_object(&registry, &obj).expect("id hash"),
            IdHash::digest(id_md.as_bytes())
        );
    }

    #[test]
    fn id_hash_depends_only_on_id_fields() {
        let registry = RecipeRegistry::new();
        registry
            .register(Recipe::new(
                "Person",
                vec![
                    Rule::new("email", ValueType::string()).id(),
                    Rule::new("name", ValueType::string()).optional(),
                ],
            ))
            .expect("register");

        let a = ObjectValue::new("Person")
            .with("email", Value::String("a@b".into()))
            .with("name", Value::String("Alice".into()));
        let b = ObjectValue::new("Person")
            .with("email", Value::String("a@b".into()))
            .with("name", Value::String("Bob".into()));

        assert_eq!(
            id_hash_object(&registry, &a).expect("a"),
            id_hash_object(&registry, &b).expect("b")
        );
        assert_ne!(
            hash_object(&registry, &a).expect("a"),
            hash_object(&registry, &b).expect("b")
        );
    }
}
