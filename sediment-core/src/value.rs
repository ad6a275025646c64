//! In-memory value trees.
//!
//! A [`Value`] is the typed, recipe-conforming representation of one field;
//! an [`ObjectValue`] is a full object carrying its type discriminator.
//! References to other entities are opaque `(kind, hash)` handles: the
//! on-disk form is always hash-addressed, so a value tree never contains
//! pointers to other objects.

use std::collections::BTreeMap;

use crate::hash::{Hash, IdHash};

/// Opaque handle to another stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Reference to a stored object by content hash.
    Object(Hash),
    /// Reference to a versioned identity by identity hash.
    Id(IdHash),
    /// Reference to a UTF-8 character stream.
    Clob(Hash),
    /// Reference to an opaque byte stream.
    Blob(Hash),
}

impl Reference {
    /// The `data-type` attribute token used in the wire format.
    pub fn data_type(&self) -> &'static str {
        match self {
            Reference::Object(_) => "obj",
            Reference::Id(_) => "id",
            Reference::Clob(_) => "clob",
            Reference::Blob(_) => "blob",
        }
    }

    /// The referenced hash rendered as 64 lowercase hex chars.
    pub fn hex(&self) -> String {
        match self {
            Reference::Object(h) | Reference::Clob(h) | Reference::Blob(h) => h.to_hex(),
            Reference::Id(i) => i.to_hex(),
        }
    }
}

/// One field value of an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    /// Arbitrary JSON, serialized canonically.
    Stringifiable(serde_json::Value),
    Reference(Reference),
    /// Ordered collection; serialization preserves the given order.
    Array(Vec<Value>),
    /// Unordered collection; serialization sorts deterministically.
    Bag(Vec<Value>),
    /// Unordered unique collection; serialization sorts and deduplicates.
    Set(Vec<Value>),
    /// Key/value entries; serialization sorts by rendered key.
    Map(Vec<(Value, Value)>),
    /// Nested anonymous record.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Order-insensitive structural equivalence.
    ///
    /// Bag, set, and map contents compare as unordered collections; this is
    /// the equality the round-trip invariant promises, since the serializer
    /// reorders those containers canonically.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            // An integral double and the same integer serialize identically,
            // so they are the same value.
            (Value::Integer(i), Value::Number(f)) | (Value::Number(f), Value::Integer(i)) => {
                f.fract() == 0.0 && *f == *i as f64
            }
            (Value::Bag(a), Value::Bag(b)) => unordered_equivalent(a, b),
            // Sets ignore multiplicity: the serializer deduplicates, so a
            // set with repeated elements is the same value as without them.
            (Value::Set(a), Value::Set(b)) => {
                a.iter().all(|x| b.iter().any(|y| x.equivalent(y)))
                    && b.iter().all(|y| a.iter().any(|x| y.equivalent(x)))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(ka, va)| {
                        b.iter()
                            .any(|(kb, vb)| ka.equivalent(kb) && va.equivalent(vb))
                    })
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.equivalent(w)))
            }
            _ => self == other,
        }
    }

    /// Collect every reference in this value, recursing into collections and
    /// nested records.
    pub fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Value::Reference(r) => out.push(*r),
            Value::Array(items) | Value::Bag(items) | Value::Set(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Value::Map(entries) => {
                for (k, v) in entries {
                    k.collect_references(out);
                    v.collect_references(out);
                }
            }
            Value::Object(fields) => {
                for v in fields.values() {
                    v.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

fn unordered_equivalent(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (i, y) in b.iter().enumerate() {
            if !used[i] && x.equivalent(y) {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// A top-level object: a type discriminator plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    /// The recipe name; also the microdata `itemtype` suffix.
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, itemprop: impl Into<String>, value: Value) -> Self {
        self.fields.insert(itemprop.into(), value);
        self
    }

    pub fn get(&self, itemprop: &str) -> Option<&Value> {
        self.fields.get(itemprop)
    }

    pub fn set(&mut self, itemprop: impl Into<String>, value: Value) {
        self.fields.insert(itemprop.into(), value);
    }

    /// Order-insensitive structural equivalence (see [`Value::equivalent`]).
    pub fn equivalent(&self, other: &ObjectValue) -> bool {
        self.type_name == other.type_name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.fields.get(k).is_some_and(|w| v.equivalent(w)))
    }

    /// All outbound references of this object, in field walk order.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for v in self.fields.values() {
            v.collect_references(&mut out);
        }
        out
    }
}
