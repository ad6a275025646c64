//! The recipe registry: type name → frozen recipe.
//!
//! Registration validates the recipe, resolves rule inheritance eagerly and
//! freezes the result; serialization never resolves anything dynamically.
//! Duplicate registration with identical content is a no-op, differing
//! content fails with `RecipeConflict`.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};
use crate::recipe::{Recipe, Rule, ValueType};

/// Thread-safe registry of frozen recipes.
#[derive(Debug, Default)]
pub struct RecipeRegistry {
    inner: RwLock<HashMap<String, Arc<Recipe>>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, resolve inheritance, and install `recipe`.
    ///
    /// Inheritance targets must already be registered. Re-registering a
    /// recipe with identical resolved content is a no-op.
    pub fn register(&self, recipe: Recipe) -> Result<()> {
        validate(&recipe)?;
        let resolved = self.resolve(recipe)?;

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.entry(resolved.name.clone()) {
            Entry::Occupied(existing) => {
                if **existing.get() == resolved {
                    Ok(())
                } else {
                    Err(CoreError::RecipeConflict {
                        name: resolved.name,
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(resolved));
                Ok(())
            }
        }
    }

    /// Look up a recipe, failing with `UnknownType` if absent.
    pub fn lookup(&self, name: &str) -> Result<Arc<Recipe>> {
        self.get(name).ok_or_else(|| CoreError::UnknownType {
            name: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Recipe>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(name)
    }

    /// Names of all registered recipes, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// Expand `inherit_from` references and default missing item types.
    fn resolve(&self, mut recipe: Recipe) -> Result<Recipe> {
        let name = recipe.name.clone();
        for rule in &mut recipe.rules {
            self.resolve_rule(&name, rule)?;
        }
        Ok(recipe)
    }

    fn resolve_rule(&self, recipe_name: &str, rule: &mut Rule) -> Result<()> {
        if let Some(path) = &rule.inherit_from {
            let (type_name, prop) =
                path.split_once('.')
                    .ok_or_else(|| CoreError::InvalidRecipe {
                        name: recipe_name.to_string(),
                        reason: format!(
                            "inheritFrom '{path}' of rule '{}' is not a Type.property path",
                            rule.itemprop
                        ),
                    })?;
            let source = self.lookup(type_name)?;
            let source_rule = source.rule(prop).ok_or_else(|| CoreError::InvalidRecipe {
                name: recipe_name.to_string(),
                reason: format!("inheritFrom '{path}' names an unknown property"),
            })?;
            // Single-level, eager copy. The source recipe is already frozen,
            // so its rule carries a concrete type.
            rule.itemtype = Some(source_rule.value_type().clone());
        }
        if rule.itemtype.is_none() {
            rule.itemtype = Some(ValueType::string());
        }
        // Nested object rules default the same way.
        if let Some(ValueType::Object { rules }) = &mut rule.itemtype {
            for nested in rules.iter_mut() {
                if nested.inherit_from.is_some() {
                    return Err(CoreError::InvalidRecipe {
                        name: recipe_name.to_string(),
                        reason: format!(
                            "nested rule '{}' must not use inheritFrom",
                            nested.itemprop
                        ),
                    });
                }
                if nested.itemtype.is_none() {
                    nested.itemtype = Some(ValueType::string());
                }
            }
        }
        Ok(())
    }
}

/// Structural validation performed before a recipe is installed.
fn validate(recipe: &Recipe) -> Result<()> {
    if recipe.name.is_empty() {
        return Err(CoreError::InvalidRecipe {
            name: recipe.name.clone(),
            reason: "recipe name must be non-empty".to_string(),
        });
    }
    validate_level(&recipe.name, &recipe.rules, true)
}

fn validate_level(recipe_name: &str, rules: &[Rule], top_level: bool) -> Result<()> {
    // Rule names are unique within a nesting level; duplication across
    // levels is permitted.
    let mut seen = BTreeSet::new();
    for rule in rules {
        if rule.itemprop.is_empty() {
            return Err(CoreError::InvalidRecipe {
                name: recipe_name.to_string(),
                reason: "rule itemprop must be non-empty".to_string(),
            });
        }
        if !seen.insert(rule.itemprop.as_str()) {
            return Err(CoreError::InvalidRecipe {
                name: recipe_name.to_string(),
                reason: format!("duplicate rule '{}' in the same nesting level", rule.itemprop),
            });
        }
        if rule.is_id && !top_level {
            return Err(CoreError::InvalidRecipe {
                name: recipe_name.to_string(),
                reason: format!("nested rule '{}' cannot be identity", rule.itemprop),
            });
        }
        if let Some(itemtype) = &rule.itemtype {
            validate_type(recipe_name, itemtype)?;
        }
    }
    Ok(())
}

fn validate_type(recipe_name: &str, itemtype: &ValueType) -> Result<()> {
    match itemtype {
        ValueType::Array { item } | ValueType::Bag { item } | ValueType::Set { item } => {
            validate_type(recipe_name, item)
        }
        ValueType::Map { key, value } => {
            validate_map_key(recipe_name, key)?;
            validate_type(recipe_name, value)
        }
        ValueType::Object { rules } => validate_level(recipe_name, rules, false),
        _ => Ok(()),
    }
}

fn validate_map_key(recipe_name: &str, key: &ValueType) -> Result<()> {
    match key {
        ValueType::String { .. }
        | ValueType::Integer
        | ValueType::Number
        | ValueType::Boolean => Ok(()),
        _ => Err(CoreError::InvalidRecipe {
            name: recipe_name.to_string(),
            reason: "map keys must be primitive".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::TypeSet;

    fn person() -> Recipe {
        Recipe::new(
            "Person",
            vec![Rule::new(
                "email",
                ValueType::string_matching("^[^@]+@[^@]+$").expect("valid pattern"),
            )
            .id()],
        )
    }

    #[test]
    fn register_and_lookup() {
        let reg = RecipeRegistry::new();
        reg.register(person()).expect("register");
        let recipe = reg.lookup("Person").expect("lookup");
        assert!(recipe.is_versioned());
        assert!(reg.has("Person"));
        assert!(!reg.has("Group"));
    }

    #[test]
    fn unknown_type_fails_lookup() {
        let reg = RecipeRegistry::new();
        let err = reg.lookup("Nope").expect_err("must fail");
        assert_eq!(err.code(), "UnknownType");
    }

    #[test]
    fn identical_reregistration_is_noop() {
        let reg = RecipeRegistry::new();
        reg.register(person()).expect("first");
        reg.register(person()).expect("second identical");
    }

    #[test]
    fn conflicting_reregistration_fails() {
        let reg = RecipeRegistry::new();
        reg.register(person()).expect("first");
        let other = Recipe::new("Person", vec![Rule::new("name", ValueType::string())]);
        let err = reg.register(other).expect_err("conflict");
        assert_eq!(err.code(), "RecipeConflict");
    }

    #[test]
    fn inheritance_copies_the_source_type() {
        let reg = RecipeRegistry::new();
        reg.register(person()).expect("person");
        reg.register(Recipe::new(
            "Contact",
            vec![Rule::inheriting("primaryEmail", "Person.email")],
        ))
        .expect("contact");

        let contact = reg.lookup("Contact").expect("lookup");
        let rule = contact.rule("primaryEmail").expect("rule");
        match rule.value_type() {
            ValueType::String { restriction } => {
                let r = restriction.as_ref().expect("restriction copied");
                assert_eq!(r.pattern(), "^[^@]+@[^@]+$");
            }
            other => panic!("unexpected type {other:?}"),
        }
    }

    #[test]
    fn inheritance_from_unregistered_type_fails() {
        let reg = RecipeRegistry::new();
        let err = reg
            .register(Recipe::new(
                "Contact",
                vec![Rule::inheriting("primaryEmail", "Person.email")],
            ))
            .expect_err("must fail");
        assert_eq!(err.code(), "UnknownType");
    }

    #[test]
    fn duplicate_props_in_one_level_fail() {
        let reg = RecipeRegistry::new();
        let err = reg
            .register(Recipe::new(
                "Dup",
                vec![
                    Rule::new("x", ValueType::string()),
                    Rule::new("x", ValueType::Integer),
                ],
            ))
            .expect_err("must fail");
        assert_eq!(err.code(), "InvalidRecipe");
    }

    #[test]
    fn duplicate_props_across_levels_are_fine() {
        let reg = RecipeRegistry::new();
        reg.register(Recipe::new(
            "Outer",
            vec![
                Rule::new("x", ValueType::string()),
                Rule::new(
                    "inner",
                    ValueType::Object {
                        rules: vec![Rule::new("x", ValueType::Integer)],
                    },
                ),
            ],
        ))
        .expect("register");
    }

    #[test]
    fn nested_id_rules_are_rejected() {
        let reg = RecipeRegistry::new();
        let err = reg
            .register(Recipe::new(
                "Bad",
                vec![Rule::new(
                    "inner",
                    ValueType::Object {
                        rules: vec![Rule::new("x", ValueType::string()).id()],
                    },
                )],
            ))
            .expect_err("must fail");
        assert_eq!(err.code(), "InvalidRecipe");
    }

    #[test]
    fn reference_rules_keep_their_allowed_sets() {
        let reg = RecipeRegistry::new();
        reg.register(Recipe::new(
            "Link",
            vec![Rule::new(
                "target",
                ValueType::ObjRef {
                    allowed: TypeSet::named(["Person"]),
                },
            )],
        ))
        .expect("register");
        let link = reg.lookup("Link").expect("lookup");
        match link.rule("target").expect("rule").value_type() {
            ValueType::ObjRef { allowed } => assert!(allowed.allows("Person")),
            other => panic!("unexpected type {other:?}"),
        }
    }
}
