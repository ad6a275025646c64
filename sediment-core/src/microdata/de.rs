//! Canonical microdata parser.
//!
//! A single forward pass over the source string: every sub-parser consumes
//! its production and advances the cursor, the grammar needs no lookahead
//! because the expected opening of each rule is fully determined by the
//! recipe. Scalar values are copied out of the buffer; no slice of the
//! source outlives the parse.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::hash::is_hash_hex;
use crate::recipe::{Rule, ValueType};
use crate::registry::RecipeRegistry;
use crate::value::{ObjectValue, Reference, Value};

use super::{unescape, ID_OBJECT_ATTR, ITEMTYPE_PREFIX};

/// A parsed object plus its outer-frame kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedObject {
    pub object: ObjectValue,
    /// Whether the outer frame carried the id-object marker.
    pub is_id_object: bool,
}

/// Parse canonical microdata into a value tree.
///
/// Accepts both the plain and the id-object outer frame; for the latter only
/// the recipe's identity rules are expected. Trailing bytes after the outer
/// end tag fail with `TrailingData`.
pub fn from_microdata(registry: &RecipeRegistry, input: &str) -> Result<ParsedObject> {
    let mut parser = Parser { src: input, pos: 0 };
    let parsed = parser.parse_outer(registry)?;
    if parser.pos != parser.src.len() {
        return Err(CoreError::TrailingData { offset: parser.pos });
    }
    Ok(parsed)
}

/// Read the type name and id-object marker from an outer frame without
/// parsing the body. Returns `None` if the input does not start with a
/// well-formed frame.
pub fn peek_type_name(input: &str) -> Option<(String, bool)> {
    let rest = input.strip_prefix("<div ")?;
    let (rest, is_id) = match rest.strip_prefix(ID_OBJECT_ATTR) {
        Some(r) => (r.strip_prefix(' ')?, true),
        None => (rest, false),
    };
    let rest = rest.strip_prefix("itemscope itemtype=\"")?;
    let rest = rest.strip_prefix(ITEMTYPE_PREFIX)?;
    let end = rest.find('"')?;
    if end == 0 {
        return None;
    }
    Some((rest[..end].to_string(), is_id))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eat(&mut self, lit: &str) -> bool {
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, lit: &str) -> Result<()> {
        if self.eat(lit) {
            Ok(())
        } else {
            Err(CoreError::BadTag {
                expected: lit.to_string(),
                offset: self.pos,
            })
        }
    }

    fn expect_end(&mut self, lit: &str) -> Result<()> {
        if self.eat(lit) {
            Ok(())
        } else {
            Err(CoreError::BadEndTag {
                expected: lit.to_string(),
                offset: self.pos,
            })
        }
    }

    /// Advance to (not past) the next occurrence of `stop`.
    fn take_until(&mut self, stop: &str) -> Result<&'a str> {
        match self.rest().find(stop) {
            Some(idx) => {
                let text = &self.src[self.pos..self.pos + idx];
                self.pos += idx;
                Ok(text)
            }
            None => Err(CoreError::BadEndTag {
                expected: stop.to_string(),
                offset: self.pos,
            }),
        }
    }

    /// Take bare text up to the next tag. Escaped text never contains a raw
    /// `<`, so this cannot overrun a closing tag.
    fn take_text(&mut self) -> &'a str {
        let idx = self.rest().find('<').unwrap_or_else(|| self.rest().len());
        let text = &self.src[self.pos..self.pos + idx];
        self.pos += idx;
        text
    }

    fn parse_outer(&mut self, registry: &RecipeRegistry) -> Result<ParsedObject> {
        self.expect("<div ")?;
        let is_id_object = {
            let mut marker = String::with_capacity(ID_OBJECT_ATTR.len() + 1);
            marker.push_str(ID_OBJECT_ATTR);
            marker.push(' ');
            self.eat(&marker)
        };
        self.expect("itemscope itemtype=\"")?;
        self.expect(ITEMTYPE_PREFIX)?;
        let type_name = self.take_until("\"")?.to_string();
        self.expect("\">")?;
        if type_name.is_empty() {
            return Err(CoreError::UnknownType { name: type_name });
        }

        let recipe = registry.lookup(&type_name)?;
        let rules: Vec<Rule> = if is_id_object {
            recipe.id_rules().cloned().collect()
        } else {
            recipe.rules.clone()
        };
        let fields = self.parse_rules(&rules)?;
        self.expect_end("</div>")?;

        Ok(ParsedObject {
            object: ObjectValue { type_name, fields },
            is_id_object,
        })
    }

    fn parse_rules(&mut self, rules: &[Rule]) -> Result<BTreeMap<String, Value>> {
        let mut fields = BTreeMap::new();
        for rule in rules {
            let opening = opening_tag(rule);
            if self.eat(&opening) {
                let value = self.parse_after_opening(rule)?;
                fields.insert(rule.itemprop.clone(), value);
            } else if !rule.optional {
                return Err(CoreError::BadTag {
                    expected: opening,
                    offset: self.pos,
                });
            }
        }
        Ok(fields)
    }

    fn parse_after_opening(&mut self, rule: &Rule) -> Result<Value> {
        let prop = rule.itemprop.as_str();
        match rule.value_type() {
            vt @ (ValueType::String { .. }
            | ValueType::Integer
            | ValueType::Number
            | ValueType::Boolean
            | ValueType::Stringifiable) => {
                let start = self.pos;
                let raw = self.take_until("</span>")?;
                let value = scalar_from_text(prop, vt, raw, start)?;
                self.expect_end("</span>")?;
                Ok(value)
            }
            vt @ (ValueType::ObjRef { .. }
            | ValueType::IdRef { .. }
            | ValueType::ClobRef
            | ValueType::BlobRef) => {
                let value = self.parse_reference_body(vt)?;
                Ok(value)
            }
            ValueType::Array { item } => {
                let items = self.parse_list_items(prop, item, "</ol>")?;
                Ok(Value::Array(items))
            }
            ValueType::Bag { item } => {
                let items = self.parse_list_items(prop, item, "</ul>")?;
                Ok(Value::Bag(items))
            }
            ValueType::Set { item } => {
                let items = self.parse_list_items(prop, item, "</ul>")?;
                Ok(Value::Set(items))
            }
            ValueType::Map { key, value } => {
                let entries = self.parse_map_entries(prop, key, value)?;
                Ok(Value::Map(entries))
            }
            ValueType::Object { rules } => {
                let fields = self.parse_rules(rules)?;
                self.expect_end("</div>")?;
                Ok(Value::Object(fields))
            }
        }
    }

    /// Parse the hash and closing tag of a reference whose opening `<a ...>`
    /// has already been consumed.
    fn parse_reference_body(&mut self, itemtype: &ValueType) -> Result<Value> {
        let hex = self.take_until("</a>")?;
        if !is_hash_hex(hex) {
            return Err(CoreError::BadHashString {
                input: hex.chars().take(80).collect(),
            });
        }
        let reference = match itemtype {
            ValueType::ObjRef { .. } => Reference::Object(hex.parse()?),
            ValueType::IdRef { .. } => Reference::Id(hex.parse()?),
            ValueType::ClobRef => Reference::Clob(hex.parse()?),
            ValueType::BlobRef => Reference::Blob(hex.parse()?),
            _ => {
                return Err(CoreError::BadTag {
                    expected: "<a".to_string(),
                    offset: self.pos,
                })
            }
        };
        self.expect_end("</a>")?;
        Ok(Value::Reference(reference))
    }

    fn parse_list_items(
        &mut self,
        prop: &str,
        item: &ValueType,
        close: &str,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while self.eat("<li>") {
            let value = self.parse_item(prop, item)?;
            self.expect_end("</li>")?;
            items.push(value);
        }
        self.expect_end(close)?;
        Ok(items)
    }

    fn parse_map_entries(
        &mut self,
        prop: &str,
        key_type: &ValueType,
        value_type: &ValueType,
    ) -> Result<Vec<(Value, Value)>> {
        let mut entries = Vec::new();
        while self.eat("<dt>") {
            let key_start = self.pos;
            let raw_key = self.take_until("</dt>")?;
            let key = scalar_from_text(prop, key_type, raw_key, key_start)?;
            self.expect_end("</dt>")?;
            self.expect("<dd>")?;
            let value = self.parse_item(prop, value_type)?;
            self.expect_end("</dd>")?;
            entries.push((key, value));
        }
        self.expect_end("</dl>")?;
        Ok(entries)
    }

    /// Parse a value in item position (inside `<li>`/`<dd>`).
    fn parse_item(&mut self, prop: &str, itemtype: &ValueType) -> Result<Value> {
        match itemtype {
            vt @ (ValueType::String { .. }
            | ValueType::Integer
            | ValueType::Number
            | ValueType::Boolean
            | ValueType::Stringifiable) => {
                let start = self.pos;
                let raw = self.take_text();
                scalar_from_text(prop, vt, raw, start)
            }
            vt @ (ValueType::ObjRef { .. }
            | ValueType::IdRef { .. }
            | ValueType::ClobRef
            | ValueType::BlobRef) => {
                self.expect(&format!("<a data-type=\"{}\">", ref_token(vt)))?;
                self.parse_reference_body(vt)
            }
            ValueType::Array { item } => {
                self.expect("<ol>")?;
                Ok(Value::Array(self.parse_list_items(prop, item, "</ol>")?))
            }
            ValueType::Bag { item } => {
                self.expect("<ul>")?;
                Ok(Value::Bag(self.parse_list_items(prop, item, "</ul>")?))
            }
            ValueType::Set { item } => {
                self.expect("<ul>")?;
                Ok(Value::Set(self.parse_list_items(prop, item, "</ul>")?))
            }
            ValueType::Map { key, value } => {
                self.expect("<dl>")?;
                Ok(Value::Map(self.parse_map_entries(prop, key, value)?))
            }
            ValueType::Object { rules } => {
                self.expect("<div>")?;
                let fields = self.parse_rules(rules)?;
                self.expect_end("</div>")?;
                Ok(Value::Object(fields))
            }
        }
    }
}

fn opening_tag(rule: &Rule) -> String {
    let prop = rule.itemprop.as_str();
    match rule.value_type() {
        ValueType::String { .. }
        | ValueType::Integer
        | ValueType::Number
        | ValueType::Boolean
        | ValueType::Stringifiable => format!("<span itemprop=\"{prop}\">"),
        vt @ (ValueType::ObjRef { .. }
        | ValueType::IdRef { .. }
        | ValueType::ClobRef
        | ValueType::BlobRef) => {
            format!("<a itemprop=\"{prop}\" data-type=\"{}\">", ref_token(vt))
        }
        ValueType::Array { .. } => format!("<ol itemprop=\"{prop}\">"),
        ValueType::Bag { .. } | ValueType::Set { .. } => format!("<ul itemprop=\"{prop}\">"),
        ValueType::Map { .. } => format!("<dl itemprop=\"{prop}\">"),
        ValueType::Object { .. } => format!("<div itemprop=\"{prop}\">"),
    }
}

fn ref_token(itemtype: &ValueType) -> &'static str {
    match itemtype {
        ValueType::ObjRef { .. } => "obj",
        ValueType::IdRef { .. } => "id",
        ValueType::ClobRef => "clob",
        ValueType::BlobRef => "blob",
        _ => "",
    }
}

fn scalar_from_text(prop: &str, itemtype: &ValueType, raw: &str, offset: usize) -> Result<Value> {
    let text = unescape(raw);
    match itemtype {
        ValueType::String { restriction } => {
            if let Some(r) = restriction {
                if !r.is_match(&text) {
                    return Err(CoreError::RegexpMismatch {
                        itemprop: prop.to_string(),
                        pattern: r.pattern().to_string(),
                    });
                }
            }
            Ok(Value::String(text))
        }
        ValueType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| CoreError::IntegerCheck {
                itemprop: prop.to_string(),
                found: text,
            }),
        ValueType::Number => match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Number(f)),
            _ => Err(CoreError::ValueMismatch {
                itemprop: prop.to_string(),
                reason: format!("'{text}' is not a finite number"),
            }),
        },
        ValueType::Boolean => match text.as_str() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(CoreError::ValueMismatch {
                itemprop: prop.to_string(),
                reason: format!("'{text}' is not a boolean"),
            }),
        },
        ValueType::Stringifiable => serde_json::from_str(&text)
            .map(Value::Stringifiable)
            .map_err(|_| CoreError::BadStringifiable { offset }),
        _ => Err(CoreError::ValueMismatch {
            itemprop: prop.to_string(),
            reason: "expected a primitive".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::microdata::ser::{to_id_microdata, to_microdata};
    use crate::recipe::{Recipe, Rule, TypeSet};

    fn registry_with(recipes: Vec<Recipe>) -> RecipeRegistry {
        let registry = RecipeRegistry::new();
        for recipe in recipes {
            registry.register(recipe).expect("register");
        }
        registry
    }

    fn full_registry() -> RecipeRegistry {
        registry_with(vec![Recipe::new(
            "Everything",
            vec![
                Rule::new("name", ValueType::string()),
                Rule::new("count", ValueType::Integer),
                Rule::new("ratio", ValueType::Number),
                Rule::new("active", ValueType::Boolean),
                Rule::new("meta", ValueType::Stringifiable).optional(),
                Rule::new(
                    "friend",
                    ValueType::ObjRef {
                        allowed: TypeSet::Any,
                    },
                )
                .optional(),
                Rule::new("tags", ValueType::bag_of(ValueType::string())).optional(),
                Rule::new("history", ValueType::array_of(ValueType::Integer)).optional(),
                Rule::new(
                    "scores",
                    ValueType::map_of(ValueType::string(), ValueType::Number),
                )
                .optional(),
                Rule::new(
                    "address",
                    ValueType::Object {
                        rules: vec![
                            Rule::new("city", ValueType::string()),
                            Rule::new("zip", ValueType::string()).optional(),
                        ],
                    },
                )
                .optional(),
            ],
        )])
    }

    fn everything() -> ObjectValue {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Value::String("Berlin".to_string()));
        ObjectValue::new("Everything")
            .with("name", Value::String("it < em & \"q\"".into()))
            .with("count", Value::Integer(-42))
            .with("ratio", Value::Number(2.5))
            .with("active", Value::Boolean(true))
            .with(
                "meta",
                Value::Stringifiable(serde_json::json!({"b": [1, null], "a": "x"})),
            )
            .with(
                "friend",
                Value::Reference(Reference::Object(Hash::digest(b"friend"))),
            )
            .with(
                "tags",
                Value::Bag(vec![
                    Value::String("zeta".into()),
                    Value::String("alpha".into()),
                ]),
            )
            .with(
                "history",
                Value::Array(vec![Value::Integer(3), Value::Integer(1)]),
            )
            .with(
                "scores",
                Value::Map(vec![
                    (Value::String("b".into()), Value::Number(0.5)),
                    (Value::String("a".into()), Value::Number(1.5)),
                ]),
            )
            .with("address", Value::Object(address))
    }

    #[test]
    fn full_round_trip() {
        let registry = full_registry();
        let obj = everything();
        let md = to_microdata(&registry, &obj).expect("serialize");
        let parsed = from_microdata(&registry, &md).expect("parse");
        assert!(!parsed.is_id_object);
        assert!(parsed.object.equivalent(&obj));

        // Reserializing the parse result reproduces the exact bytes.
        let again = to_microdata(&registry, &parsed.object).expect("reserialize");
        assert_eq!(md, again);
    }

    #[test]
    fn id_round_trip() {
        let registry = registry_with(vec![Recipe::new(
            "Person",
            vec![
                Rule::new("email", ValueType::string()).id(),
                Rule::new("name", ValueType::string()).optional(),
            ],
        )]);
        let obj = ObjectValue::new("Person")
            .with("email", Value::String("a@b".into()))
            .with("name", Value::String("Alice".into()));
        let id_md = to_id_microdata(&registry, &obj).expect("serialize");
        let parsed = from_microdata(&registry, &id_md).expect("parse");
        assert!(parsed.is_id_object);
        assert_eq!(
            parsed.object.get("email"),
            Some(&Value::String("a@b".into()))
        );
        assert!(parsed.object.get("name").is_none());
    }

    #[test]
    fn trailing_data_is_rejected() {
        let registry = registry_with(vec![Recipe::new(
            "Person",
            vec![Rule::new("email", ValueType::string())],
        )]);
        let obj = ObjectValue::new("Person").with("email", Value::String("a@b".into()));
        let mut md = to_microdata(&registry, &obj).expect("serialize");
        let good_len = md.len();
        md.push_str("junk");
        let err = from_microdata(&registry, &md).expect_err("must fail");
        assert_eq!(err.code(), "TrailingData");
        assert_eq!(err.offset(), Some(good_len));
    }

    #[test]
    fn bad_end_tag_carries_the_offset() {
        let registry = registry_with(vec![Recipe::new(
            "Person",
            vec![Rule::new("email", ValueType::string())],
        )]);
        let md = "<div itemscope itemtype=\"//refin.io/Person\">\
                  <span itemprop=\"email\">a@b</span>";
        let err = from_microdata(&registry, md).expect_err("must fail");
        assert_eq!(err.code(), "BadEndTag");
        assert_eq!(err.offset(), Some(md.len()));
    }

    #[test]
    fn wrong_hash_length_is_rejected() {
        let registry = registry_with(vec![Recipe::new(
            "Link",
            vec![Rule::new(
                "target",
                ValueType::ObjRef {
                    allowed: TypeSet::Any,
                },
            )],
        )]);
        let md = "<div itemscope itemtype=\"//refin.io/Link\">\
                  <a itemprop=\"target\" data-type=\"obj\">abc123</a></div>";
        let err = from_microdata(&registry, md).expect_err("must fail");
        assert_eq!(err.code(), "BadHashString");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = RecipeRegistry::new();
        let md = "<div itemscope itemtype=\"//refin.io/Ghost\"></div>";
        let err = from_microdata(&registry, md).expect_err("must fail");
        assert_eq!(err.code(), "UnknownType");
    }

    #[test]
    fn empty_and_absent_collections_are_distinguished() {
        let registry = registry_with(vec![Recipe::new(
            "List",
            vec![Rule::new("items", ValueType::array_of(ValueType::Integer)).optional()],
        )]);

        let explicit = "<div itemscope itemtype=\"//refin.io/List\">\
                        <ol itemprop=\"items\"></ol></div>";
        let parsed = from_microdata(&registry, explicit).expect("parse");
        assert_eq!(parsed.object.get("items"), Some(&Value::Array(vec![])));

        let absent = "<div itemscope itemtype=\"//refin.io/List\"></div>";
        let parsed = from_microdata(&registry, absent).expect("parse");
        assert!(parsed.object.get("items").is_none());
    }

    #[test]
    fn nested_collections_round_trip() {
        let registry = registry_with(vec![Recipe::new(
            "Matrix",
            vec![Rule::new(
                "rows",
                ValueType::array_of(ValueType::array_of(ValueType::Integer)),
            )],
        )]);
        let obj = ObjectValue::new("Matrix").with(
            "rows",
            Value::Array(vec![
                Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
                Value::Array(vec![]),
            ]),
        );
        let md = to_microdata(&registry, &obj).expect("serialize");
        let parsed = from_microdata(&registry, &md).expect("parse");
        assert!(parsed.object.equivalent(&obj));
    }

    #[test]
    fn reference_collections_round_trip() {
        let registry = registry_with(vec![Recipe::new(
            "Links",
            vec![Rule::new(
                "targets",
                ValueType::bag_of(ValueType::ObjRef {
                    allowed: TypeSet::Any,
                }),
            )],
        )]);
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let obj = ObjectValue::new("Links").with(
            "targets",
            Value::Bag(vec![
                Value::Reference(Reference::Object(a)),
                Value::Reference(Reference::Object(b)),
            ]),
        );
        let md = to_microdata(&registry, &obj).expect("serialize");
        // Collection references carry no itemprop.
        assert!(md.contains("<li><a data-type=\"obj\">"));
        let parsed = from_microdata(&registry, &md).expect("parse");
        assert!(parsed.object.equivalent(&obj));
    }

    #[test]
    fn peek_type_name_reads_the_frame() {
        assert_eq!(
            peek_type_name("<div itemscope itemtype=\"//refin.io/Person\"></div>"),
            Some(("Person".to_string(), false))
        );
        assert_eq!(
            peek_type_name(
                "<div data-id-object=\"true\" itemscope itemtype=\"//refin.io/Person\"></div>"
            ),
            Some(("Person".to_string(), true))
        );
        assert_eq!(peek_type_name("<span>nope</span>"), None);
    }

    #[test]
    fn exponential_numbers_round_trip() {
        let registry = registry_with(vec![Recipe::new(
            "Reading",
            vec![Rule::new("v", ValueType::Number)],
        )]);
        for value in [1e21, -2e21, 1.5e-7, 9.9e-7, 1e-6, 123.45] {
            let obj = ObjectValue::new("Reading").with("v", Value::Number(value));
            let md = to_microdata(&registry, &obj).expect("serialize");
            let parsed = from_microdata(&registry, &md).expect("parse");
            assert_eq!(parsed.object.get("v"), Some(&Value::Number(value)));
            let again = to_microdata(&registry, &parsed.object).expect("reserialize");
            assert_eq!(md, again);
        }
    }

    #[test]
    fn integer_parse_failure_is_integer_check() {
        let registry = registry_with(vec![Recipe::new(
            "Count",
            vec![Rule::new("n", ValueType::Integer)],
        )]);
        let md = "<div itemscope itemtype=\"//refin.io/Count\">\
                  <span itemprop=\"n\">1.5</span></div>";
        let err = from_microdata(&registry, md).expect_err("must fail");
        assert_eq!(err.code(), "IntegerCheck");
    }
}
