//! Recipes: declarative schemas for object types.
//!
//! A [`Recipe`] is an ordered list of [`Rule`]s. Rule order is canonical:
//! the serializer walks rules in declaration order, so two recipes with the
//! same rules in different order describe different canonical forms.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{CoreError, Result};

/// A compiled string restriction.
///
/// Equality is on the pattern source, not the compiled automaton, so recipes
/// carrying restrictions can be compared for conflict detection.
#[derive(Debug, Clone)]
pub struct StringRestriction {
    pattern: String,
    regex: Regex,
}

impl StringRestriction {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern).map_err(|e| CoreError::InvalidRecipe {
            name: String::new(),
            reason: format!("invalid regexp /{pattern}/: {e}"),
        })?;
        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for StringRestriction {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for StringRestriction {}

/// Allowed target types of a reference rule. `*` registers as [`TypeSet::Any`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSet {
    Any,
    Named(BTreeSet<String>),
}

impl TypeSet {
    /// Build a named set; the wildcard entry `*` collapses the whole set to
    /// [`TypeSet::Any`].
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.into();
            if name == "*" {
                return TypeSet::Any;
            }
            set.insert(name);
        }
        TypeSet::Named(set)
    }

    pub fn allows(&self, type_name: &str) -> bool {
        match self {
            TypeSet::Any => true,
            TypeSet::Named(set) => set.contains(type_name),
        }
    }
}

/// The kind of value a rule accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    String {
        restriction: Option<StringRestriction>,
    },
    Integer,
    Number,
    Boolean,
    /// Arbitrary JSON, rendered canonically.
    Stringifiable,
    /// Reference to a stored object by content hash.
    ObjRef { allowed: TypeSet },
    /// Reference to a versioned identity by identity hash.
    IdRef { allowed: TypeSet },
    ClobRef,
    BlobRef,
    Array { item: Box<ValueType> },
    Bag { item: Box<ValueType> },
    Set { item: Box<ValueType> },
    Map {
        key: Box<ValueType>,
        value: Box<ValueType>,
    },
    /// Nested anonymous record with its own rules.
    Object { rules: Vec<Rule> },
}

impl ValueType {
    /// Plain unrestricted string, the default for rules without `itemtype`.
    pub fn string() -> Self {
        ValueType::String { restriction: None }
    }

    pub fn string_matching(pattern: &str) -> Result<Self> {
        Ok(ValueType::String {
            restriction: Some(StringRestriction::new(pattern)?),
        })
    }

    pub fn obj_ref_to_any() -> Self {
        ValueType::ObjRef {
            allowed: TypeSet::Any,
        }
    }

    pub fn array_of(item: ValueType) -> Self {
        ValueType::Array {
            item: Box::new(item),
        }
    }

    pub fn bag_of(item: ValueType) -> Self {
        ValueType::Bag {
            item: Box::new(item),
        }
    }

    pub fn set_of(item: ValueType) -> Self {
        ValueType::Set {
            item: Box::new(item),
        }
    }

    pub fn map_of(key: ValueType, value: ValueType) -> Self {
        ValueType::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }
}

/// Fallback type for rules that declare neither `itemtype` nor inheritance.
static DEFAULT_STRING: ValueType = ValueType::String { restriction: None };

/// One field schema of a recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub itemprop: String,
    /// `None` means "inherit or default to plain string"; registration
    /// resolves this so looked-up recipes always carry a concrete type.
    pub itemtype: Option<ValueType>,
    /// Marks this rule as part of the identity. Only valid at the top level.
    pub is_id: bool,
    pub optional: bool,
    /// Dotted `Type.property` path; the referenced rule's `itemtype` is
    /// copied in at registration.
    pub inherit_from: Option<String>,
}

impl Rule {
    pub fn new(itemprop: impl Into<String>, itemtype: ValueType) -> Self {
        Self {
            itemprop: itemprop.into(),
            itemtype: Some(itemtype),
            is_id: false,
            optional: false,
            inherit_from: None,
        }
    }

    /// Rule inheriting its type from `Type.property`.
    pub fn inheriting(itemprop: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            itemprop: itemprop.into(),
            itemtype: None,
            is_id: false,
            optional: false,
            inherit_from: Some(from.into()),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    /// The concrete value type of this rule.
    pub fn value_type(&self) -> &ValueType {
        self.itemtype.as_ref().unwrap_or(&DEFAULT_STRING)
    }
}

/// Declarative schema for one object type.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Recipe {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    /// A recipe is versioned iff at least one top-level rule is identity.
    pub fn is_versioned(&self) -> bool {
        self.rules.iter().any(|r| r.is_id)
    }

    pub fn rule(&self, itemprop: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.itemprop == itemprop)
    }

    /// Top-level identity rules, in declaration order.
    pub fn id_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_collapses_type_set() {
        let set = TypeSet::named(["Person", "*"]);
        assert_eq!(set, TypeSet::Any);
        assert!(set.allows("Anything"));
    }

    #[test]
    fn named_type_set_filters() {
        let set = TypeSet::named(["Person"]);
        assert!(set.allows("Person"));
        assert!(!set.allows("Group"));
    }

    #[test]
    fn restriction_compares_by_pattern() {
        let a = StringRestriction::new("^a+$").expect("valid pattern");
        let b = StringRestriction::new("^a+$").expect("valid pattern");
        let c = StringRestriction::new("^b+$").expect("valid pattern");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_match("aaa"));
        assert!(!a.is_match("ab"));
    }

    #[test]
    fn versioned_detection_is_top_level_only() {
        let plain = Recipe::new("Plain", vec![Rule::new("x", ValueType::string())]);
        assert!(!plain.is_versioned());

        let versioned = Recipe::new("Versioned", vec![Rule::new("x", ValueType::string()).id()]);
        assert!(versioned.is_versioned());
    }

    #[test]
    fn default_rule_type_is_plain_string() {
        let rule = Rule {
            itemprop: "x".to_string(),
            itemtype: None,
            is_id: false,
            optional: false,
            inherit_from: None,
        };
        assert_eq!(rule.value_type(), &ValueType::string());
    }
}
