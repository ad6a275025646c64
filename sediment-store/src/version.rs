//! Version DAG node types.
//!
//! Version nodes are ordinary stored objects: an `Edge` opens an identity's
//! history, every later version is a `Change` linking to its predecessor.
//! The per-identity head pointer lives in the `vheads` space and names the
//! newest node's hash. The recipes here are built-in and registered at
//! instance init.

use sediment_core::{
    ObjectValue, Recipe, Reference, Rule, TypeSet, Value, ValueType,
};
use sediment_core::Hash;

use crate::error::{Result, StoreError};
use crate::space::Space;

/// Recipe name of the initial node of an identity.
pub const VERSION_NODE_EDGE: &str = "VersionNodeEdge";
/// Recipe name of every subsequent node.
pub const VERSION_NODE_CHANGE: &str = "VersionNodeChange";

/// The built-in recipes backing the version DAG.
pub fn version_recipes() -> Vec<Recipe> {
    vec![
        Recipe::new(
            VERSION_NODE_EDGE,
            vec![Rule::new("data", ValueType::obj_ref_to_any())],
        ),
        Recipe::new(
            VERSION_NODE_CHANGE,
            vec![
                Rule::new("data", ValueType::obj_ref_to_any()),
                Rule::new(
                    "prev",
                    ValueType::ObjRef {
                        allowed: TypeSet::named([VERSION_NODE_EDGE, VERSION_NODE_CHANGE]),
                    },
                ),
            ],
        ),
    ]
}

/// One node of an identity's linear history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionNode {
    /// Initial version.
    Edge { data: Hash },
    /// Subsequent version linking to the prior node.
    Change { data: Hash, prev: Hash },
}

impl VersionNode {
    /// The payload object hash this node records.
    pub fn data(&self) -> Hash {
        match self {
            VersionNode::Edge { data } | VersionNode::Change { data, .. } => *data,
        }
    }

    /// The prior node's hash; `None` for an `Edge`.
    pub fn prev(&self) -> Option<Hash> {
        match self {
            VersionNode::Edge { .. } => None,
            VersionNode::Change { prev, .. } => Some(*prev),
        }
    }

    pub(crate) fn to_object(self) -> ObjectValue {
        match self {
            VersionNode::Edge { data } => ObjectValue::new(VERSION_NODE_EDGE)
                .with("data", Value::Reference(Reference::Object(data))),
            VersionNode::Change { data, prev } => ObjectValue::new(VERSION_NODE_CHANGE)
                .with("data", Value::Reference(Reference::Object(data)))
                .with("prev", Value::Reference(Reference::Object(prev))),
        }
    }

    pub(crate) fn from_object(key: &str, obj: &ObjectValue) -> Result<Self> {
        let data = object_ref(key, obj, "data")?;
        match obj.type_name.as_str() {
            VERSION_NODE_EDGE => Ok(VersionNode::Edge { data }),
            VERSION_NODE_CHANGE => {
                let prev = object_ref(key, obj, "prev")?;
                Ok(VersionNode::Change { data, prev })
            }
            other => Err(StoreError::Corrupt {
                space: Space::Objects,
                key: key.to_string(),
                reason: format!("'{other}' is not a version node type"),
            }),
        }
    }
}

fn object_ref(key: &str, obj: &ObjectValue, prop: &str) -> Result<Hash> {
    match obj.get(prop) {
        Some(Value::Reference(Reference::Object(hash))) => Ok(*hash),
        _ => Err(StoreError::Corrupt {
            space: Space::Objects,
            key: key.to_string(),
            reason: format!("version node lacks an object reference '{prop}'"),
        }),
    }
}

/// How a versioned store call appends to the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAs {
    /// Append a new node with `prev` = current head, even when the payload
    /// equals the head's.
    Change,
    /// Replay of an already-known version: a no-op when the payload is
    /// anywhere in the recorded history, a fast-forward append otherwise.
    Merge,
}
