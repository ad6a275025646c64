//! Canonical microdata serializer.
//!
//! Serialization walks the recipe's rules in declaration order and emits one
//! deterministic rendering: bags and sets sort their items by pre-escape
//! text, maps sort by pre-escape key, arrays keep caller order. The output
//! is a pure function of (recipe, value); no insertion-order or whitespace
//! variance.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{CoreError, Result};
use crate::json::canonical_json;
use crate::recipe::{Recipe, Rule, ValueType};
use crate::registry::RecipeRegistry;
use crate::value::{ObjectValue, Reference, Value};

use super::{escape_into, ID_OBJECT_ATTR, ITEMTYPE_PREFIX};

/// Serialize `obj` to its canonical microdata text.
pub fn to_microdata(registry: &RecipeRegistry, obj: &ObjectValue) -> Result<String> {
    let recipe = registry.lookup(&obj.type_name)?;
    let mut out = String::new();
    let _ = write!(
        out,
        "<div itemscope itemtype=\"{ITEMTYPE_PREFIX}{}\">",
        obj.type_name
    );
    write_rules(&mut out, &recipe, &recipe.rules, &obj.fields, true)?;
    out.push_str("</div>");
    Ok(out)
}

/// Serialize the identity-restricted form of `obj`.
///
/// Only identity rules are emitted, inside an outer frame carrying the
/// id-object marker. Non-identity fields of `obj` are ignored.
pub fn to_id_microdata(registry: &RecipeRegistry, obj: &ObjectValue) -> Result<String> {
    let recipe = registry.lookup(&obj.type_name)?;
    if !recipe.is_versioned() {
        return Err(CoreError::InvalidRecipe {
            name: recipe.name.clone(),
            reason: "recipe has no identity rules".to_string(),
        });
    }
    let id_rules: Vec<Rule> = recipe.id_rules().cloned().collect();
    let mut out = String::new();
    let _ = write!(
        out,
        "<div {ID_OBJECT_ATTR} itemscope itemtype=\"{ITEMTYPE_PREFIX}{}\">",
        obj.type_name
    );
    write_rules(&mut out, &recipe, &id_rules, &obj.fields, false)?;
    out.push_str("</div>");
    Ok(out)
}

fn write_rules(
    out: &mut String,
    recipe: &Recipe,
    rules: &[Rule],
    fields: &BTreeMap<String, Value>,
    check_unknown: bool,
) -> Result<()> {
    for rule in rules {
        match fields.get(&rule.itemprop) {
            Some(value) => {
                write_property(out, recipe, rule, value)?;
            }
            None if rule.optional => {}
            None => {
                return Err(CoreError::MissingMandatory {
                    recipe: recipe.name.clone(),
                    itemprop: rule.itemprop.clone(),
                });
            }
        }
    }
    if check_unknown {
        for key in fields.keys() {
            if !rules.iter().any(|r| &r.itemprop == key) {
                return Err(CoreError::UnknownProperty {
                    recipe: recipe.name.clone(),
                    itemprop: key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn write_property(out: &mut String, recipe: &Recipe, rule: &Rule, value: &Value) -> Result<()> {
    let prop = rule.itemprop.as_str();
    match rule.value_type() {
        ValueType::String { .. }
        | ValueType::Integer
        | ValueType::Number
        | ValueType::Boolean
        | ValueType::Stringifiable => {
            let _ = write!(out, "<span itemprop=\"{prop}\">");
            write_scalar(out, prop, rule.value_type(), value)?;
            out.push_str("</span>");
        }
        ValueType::ObjRef { .. } | ValueType::IdRef { .. } | ValueType::ClobRef
        | ValueType::BlobRef => {
            let reference = expect_reference(prop, rule.value_type(), value)?;
            let _ = write!(
                out,
                "<a itemprop=\"{prop}\" data-type=\"{}\">{}</a>",
                reference.data_type(),
                reference.hex()
            );
        }
        ValueType::Array { item } => {
            let items = match value {
                Value::Array(items) => items,
                _ => return Err(mismatch(prop, "expected an array")),
            };
            let _ = write!(out, "<ol itemprop=\"{prop}\">");
            for v in items {
                out.push_str("<li>");
                write_item(out, prop, item, v)?;
                out.push_str("</li>");
            }
            out.push_str("</ol>");
        }
        ValueType::Bag { item } => {
            let items = match value {
                Value::Bag(items) => items,
                _ => return Err(mismatch(prop, "expected a bag")),
            };
            let _ = write!(out, "<ul itemprop=\"{prop}\">");
            write_unordered(out, prop, item, items, false)?;
            out.push_str("</ul>");
        }
        ValueType::Set { item } => {
            let items = match value {
                Value::Set(items) => items,
                _ => return Err(mismatch(prop, "expected a set")),
            };
            let _ = write!(out, "<ul itemprop=\"{prop}\">");
            write_unordered(out, prop, item, items, true)?;
            out.push_str("</ul>");
        }
        ValueType::Map { key, value: vt } => {
            let entries = match value {
                Value::Map(entries) => entries,
                _ => return Err(mismatch(prop, "expected a map")),
            };
            let _ = write!(out, "<dl itemprop=\"{prop}\">");
            write_map(out, prop, key, vt, entries)?;
            out.push_str("</dl>");
        }
        ValueType::Object { rules } => {
            let fields = match value {
                Value::Object(fields) => fields,
                _ => return Err(mismatch(prop, "expected a nested object")),
            };
            let _ = write!(out, "<div itemprop=\"{prop}\">");
            write_rules(out, recipe, rules, fields, true)?;
            out.push_str("</div>");
        }
    }
    Ok(())
}

/// Serialize a value in item position (inside `<li>`/`<dd>`): same forms as
/// property position, minus the `itemprop` attribute.
fn write_item(out: &mut String, prop: &str, itemtype: &ValueType, value: &Value) -> Result<()> {
    match itemtype {
        ValueType::String { .. }
        | ValueType::Integer
        | ValueType::Number
        | ValueType::Boolean
        | ValueType::Stringifiable => write_scalar(out, prop, itemtype, value),
        ValueType::ObjRef { .. } | ValueType::IdRef { .. } | ValueType::ClobRef
        | ValueType::BlobRef => {
            let reference = expect_reference(prop, itemtype, value)?;
            let _ = write!(
                out,
                "<a data-type=\"{}\">{}</a>",
                reference.data_type(),
                reference.hex()
            );
            Ok(())
        }
        ValueType::Array { item } => {
            let items = match value {
                Value::Array(items) => items,
                _ => return Err(mismatch(prop, "expected an array")),
            };
            out.push_str("<ol>");
            for v in items {
                out.push_str("<li>");
                write_item(out, prop, item, v)?;
                out.push_str("</li>");
            }
            out.push_str("</ol>");
            Ok(())
        }
        ValueType::Bag { item } => {
            let items = match value {
                Value::Bag(items) => items,
                _ => return Err(mismatch(prop, "expected a bag")),
            };
            out.push_str("<ul>");
            write_unordered(out, prop, item, items, false)?;
            out.push_str("</ul>");
            Ok(())
        }
        ValueType::Set { item } => {
            let items = match value {
                Value::Set(items) => items,
                _ => return Err(mismatch(prop, "expected a set")),
            };
            out.push_str("<ul>");
            write_unordered(out, prop, item, items, true)?;
            out.push_str("</ul>");
            Ok(())
        }
        ValueType::Map { key, value: vt } => {
            let entries = match value {
                Value::Map(entries) => entries,
                _ => return Err(mismatch(prop, "expected a map")),
            };
            out.push_str("<dl>");
            write_map(out, prop, key, vt, entries)?;
            out.push_str("</dl>");
            Ok(())
        }
        ValueType::Object { rules } => {
            let fields = match value {
                Value::Object(fields) => fields,
                _ => return Err(mismatch(prop, "expected a nested object")),
            };
            out.push_str("<div>");
            // Nested records keep full rule checking; the rule list is
            // anonymous, so errors borrow the collection's itemprop.
            let anon = Recipe::new(prop, rules.clone());
            write_rules(out, &anon, rules, fields, true)?;
            out.push_str("</div>");
            Ok(())
        }
    }
}

/// Render bag/set items deterministically. The sort key is the item's
/// pre-escape text for scalars (strings by code point, so `"` orders before
/// `#` even though its escaped form `&quot;` would not) and the rendered
/// fragment for everything else (reference hashes are plain hex already).
/// Sets additionally drop duplicate items.
fn write_unordered(
    out: &mut String,
    prop: &str,
    itemtype: &ValueType,
    items: &[Value],
    dedup: bool,
) -> Result<()> {
    let mut rendered: Vec<(String, String)> = Vec::with_capacity(items.len());
    for v in items {
        let mut frag = String::new();
        write_item(&mut frag, prop, itemtype, v)?;
        let key = item_sort_key(prop, itemtype, v, &frag)?;
        rendered.push((key, frag));
    }
    rendered.sort();
    if dedup {
        rendered.dedup();
    }
    for (_, frag) in rendered {
        out.push_str("<li>");
        out.push_str(&frag);
        out.push_str("</li>");
    }
    Ok(())
}

fn item_sort_key(
    prop: &str,
    itemtype: &ValueType,
    value: &Value,
    fragment: &str,
) -> Result<String> {
    match itemtype {
        ValueType::String { .. }
        | ValueType::Integer
        | ValueType::Number
        | ValueType::Boolean
        | ValueType::Stringifiable => raw_scalar_text(prop, itemtype, value),
        _ => Ok(fragment.to_string()),
    }
}

/// Render map entries sorted by their raw key text (code-point order,
/// before escaping).
fn write_map(
    out: &mut String,
    prop: &str,
    key_type: &ValueType,
    value_type: &ValueType,
    entries: &[(Value, Value)],
) -> Result<()> {
    let mut rendered: Vec<(String, String)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let raw_key = raw_scalar_text(prop, key_type, k)?;
        let mut value_frag = String::new();
        write_item(&mut value_frag, prop, value_type, v)?;
        rendered.push((raw_key, value_frag));
    }
    rendered.sort_by(|a, b| a.0.cmp(&b.0));
    for window in rendered.windows(2) {
        if window[0].0 == window[1].0 {
            return Err(mismatch(prop, "duplicate map key"));
        }
    }
    for (k, v) in rendered {
        out.push_str("<dt>");
        escape_into(out, &k);
        let _ = write!(out, "</dt><dd>{v}</dd>");
    }
    Ok(())
}

fn write_scalar(out: &mut String, prop: &str, itemtype: &ValueType, value: &Value) -> Result<()> {
    let raw = raw_scalar_text(prop, itemtype, value)?;
    escape_into(out, &raw);
    Ok(())
}

/// The canonical text of a scalar before HTML escaping. This is also the
/// ordering key for unordered containers and map keys.
fn raw_scalar_text(prop: &str, itemtype: &ValueType, value: &Value) -> Result<String> {
    match itemtype {
        ValueType::String { restriction } => {
            let s = match value {
                Value::String(s) => s,
                _ => return Err(mismatch(prop, "expected a string")),
            };
            if let Some(r) = restriction {
                if !r.is_match(s) {
                    return Err(CoreError::RegexpMismatch {
                        itemprop: prop.to_string(),
                        pattern: r.pattern().to_string(),
                    });
                }
            }
            Ok(s.clone())
        }
        ValueType::Integer => Ok(integer_value(prop, value)?.to_string()),
        ValueType::Number => match value {
            Value::Number(f) => {
                if !f.is_finite() {
                    return Err(CoreError::NonFiniteNumber {
                        itemprop: prop.to_string(),
                    });
                }
                Ok(format_f64(*f))
            }
            Value::Integer(i) => Ok(i.to_string()),
            _ => Err(mismatch(prop, "expected a number")),
        },
        ValueType::Boolean => match value {
            Value::Boolean(true) => Ok("true".to_string()),
            Value::Boolean(false) => Ok("false".to_string()),
            _ => Err(mismatch(prop, "expected a boolean")),
        },
        ValueType::Stringifiable => match value {
            Value::Stringifiable(json) => Ok(canonical_json(json)),
            _ => Err(mismatch(prop, "expected a stringifiable value")),
        },
        _ => Err(mismatch(prop, "expected a primitive")),
    }
}

fn integer_value(prop: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        // An integral double is accepted the way dynamically typed callers
        // produce integers.
        Value::Number(f)
            if f.is_finite()
                && f.fract() == 0.0
                && *f >= i64::MIN as f64
                && *f <= i64::MAX as f64 =>
        {
            Ok(*f as i64)
        }
        Value::Number(f) => Err(CoreError::IntegerCheck {
            itemprop: prop.to_string(),
            found: format_f64(*f),
        }),
        other => Err(CoreError::IntegerCheck {
            itemprop: prop.to_string(),
            found: format!("{other:?}"),
        }),
    }
}

/// Shortest round-trip rendering with the ECMAScript `Number::toString`
/// notation rules: plain decimal for magnitudes in `[1e-6, 1e21)`,
/// exponential outside (`1e+21`, `1.5e-7`), positive exponents carry an
/// explicit `+`. Negative zero normalizes to `0`.
fn format_f64(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let magnitude = f.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let mut text = format!("{f:e}");
        if let Some(pos) = text.find('e') {
            if text.as_bytes().get(pos + 1) != Some(&b'-') {
                text.insert(pos + 1, '+');
            }
        }
        return text;
    }
    format!("{f}")
}

fn expect_reference(prop: &str, itemtype: &ValueType, value: &Value) -> Result<Reference> {
    let reference = match value {
        Value::Reference(r) => *r,
        _ => return Err(mismatch(prop, "expected a reference")),
    };
    let ok = matches!(
        (itemtype, &reference),
        (ValueType::ObjRef { .. }, Reference::Object(_))
            | (ValueType::IdRef { .. }, Reference::Id(_))
            | (ValueType::ClobRef, Reference::Clob(_))
            | (ValueType::BlobRef, Reference::Blob(_))
    );
    if ok {
        Ok(reference)
    } else {
        Err(mismatch(prop, "reference kind does not match the rule"))
    }
}

fn mismatch(prop: &str, reason: &str) -> CoreError {
    CoreError::ValueMismatch {
        itemprop: prop.to_string(),
        reason: reason.to_string(),
    }
}
