//! Implode and explode: inline referenced content, and invert that.
//!
//! Implode rewrites every `<a …>` reference element into a `<span
//! data-hash="…">…</span>` wrapper holding the referenced content,
//! recursively, until the result is fully self-contained. Identity
//! references inline their current head version and carry `data-id-hash`;
//! CLOB/BLOB inlines carry `data-type` so explode can tell escaped text
//! from base64 without recipe lookups.
//!
//! Explode walks the wrappers innermost-first, re-stores every child
//! through the ordinary store path, verifies that the re-stored hash equals
//! the wrapper's claim, and puts the `<a>` element back. A well-formed
//! implosion therefore explodes to exactly the root hash it started from.

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use sediment_core::{escape, from_microdata, unescape, Hash, IdHash};

use crate::error::{Result, StoreError};
use crate::repository::{Repository, Status};
use crate::version::StoreAs;

/// Result of exploding an imploded microdata tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplodeResult {
    pub hash: Hash,
    /// Present when the root object is versioned.
    pub id_hash: Option<IdHash>,
    pub status: Status,
}

type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

impl Repository {
    /// Inline every reference reachable from `root` into one self-contained
    /// microdata string.
    pub async fn implode(&self, root: &Hash) -> Result<String> {
        let _op = self.gate.begin()?;
        let text = self.read_object_text(root).await?;
        self.inline_references(text).await
    }

    /// Parse an imploded tree, re-store every inlined child (leaves first),
    /// verify each wrapper's hash claims, and store the root.
    pub async fn explode(&self, imploded: &str) -> Result<ExplodeResult> {
        let _op = self.gate.begin()?;
        let canonical = self.extract_inlined(imploded.to_string()).await?;
        self.store_exploded(&canonical).await
    }

    fn inline_references(&self, text: String) -> BoxedResult<'_> {
        Box::pin(async move {
            let mut out = String::with_capacity(text.len() * 2);
            let mut rest = text.as_str();
            while let Some(idx) = rest.find("<a ") {
                out.push_str(&rest[..idx]);
                let element = &rest[idx..];
                let gt = element
                    .find('>')
                    .ok_or_else(|| invalid("unterminated reference tag"))?;
                let close = element
                    .find("</a>")
                    .ok_or_else(|| invalid("unterminated reference element"))?;
                if close < gt {
                    return Err(invalid("malformed reference element"));
                }
                let attrs = &element[3..gt];
                let hex = &element[gt + 1..close];
                let data_type =
                    attr_value(attrs, "data-type").ok_or_else(|| invalid("reference without data-type"))?;
                let prop_attr = match attr_value(attrs, "itemprop") {
                    Some(prop) => format!(" itemprop=\"{prop}\""),
                    None => String::new(),
                };

                match data_type {
                    "obj" => {
                        let hash: Hash = hex.parse()?;
                        let child = self.read_object_text(&hash).await?;
                        let inlined = self.inline_references(child).await?;
                        let _ = write!(
                            out,
                            "<span{prop_attr} data-hash=\"{hex}\">{inlined}</span>"
                        );
                    }
                    "id" => {
                        let id_hash: IdHash = hex.parse()?;
                        let (_, node) = self.current_node(&id_hash).await?;
                        let data = node.data();
                        let child = self.read_object_text(&data).await?;
                        let inlined = self.inline_references(child).await?;
                        let _ = write!(
                            out,
                            "<span{prop_attr} data-hash=\"{data}\" data-id-hash=\"{hex}\">{inlined}</span>"
                        );
                    }
                    "clob" => {
                        let hash: Hash = hex.parse()?;
                        let clob = self.load_clob(&hash).await?;
                        let _ = write!(
                            out,
                            "<span{prop_attr} data-hash=\"{hex}\" data-type=\"clob\">{}</span>",
                            escape(&clob)
                        );
                    }
                    "blob" => {
                        let hash: Hash = hex.parse()?;
                        let blob = self.load_blob(&hash).await?;
                        let _ = write!(
                            out,
                            "<span{prop_attr} data-hash=\"{hex}\" data-type=\"blob\">{}</span>",
                            BASE64.encode(&blob)
                        );
                    }
                    other => {
                        return Err(invalid(&format!("unknown reference data-type '{other}'")));
                    }
                }
                rest = &element[close + 4..];
            }
            out.push_str(rest);
            Ok(out)
        })
    }

    fn extract_inlined(&self, text: String) -> BoxedResult<'_> {
        Box::pin(async move {
            let mut out = String::with_capacity(text.len());
            let mut rest = text.as_str();
            while let Some(idx) = rest.find("<span ") {
                let element = &rest[idx..];
                let gt = element
                    .find('>')
                    .ok_or_else(|| invalid("unterminated span tag"))?;
                let attrs = &element[6..gt];
                let Some(data_hash) = attr_value(attrs, "data-hash") else {
                    // Ordinary value span; copy the tag and keep scanning.
                    out.push_str(&rest[..idx + gt + 1]);
                    rest = &element[gt + 1..];
                    continue;
                };
                out.push_str(&rest[..idx]);

                let (content, remainder) = split_balanced_span(&element[gt + 1..])?;
                let prop_attr = match attr_value(attrs, "itemprop") {
                    Some(prop) => format!(" itemprop=\"{prop}\""),
                    None => String::new(),
                };
                let data_id_hash = attr_value(attrs, "data-id-hash");

                match attr_value(attrs, "data-type") {
                    Some("clob") => {
                        let clob = unescape(content);
                        let stored = self.store_clob(&clob).await?;
                        verify_hash(data_hash, stored.hash)?;
                        let _ = write!(out, "<a{prop_attr} data-type=\"clob\">{data_hash}</a>");
                    }
                    Some("blob") => {
                        let bytes = BASE64
                            .decode(content)
                            .map_err(|_| invalid("inlined blob is not base64"))?;
                        let stored = self.store_blob(&bytes).await?;
                        verify_hash(data_hash, stored.hash)?;
                        let _ = write!(out, "<a{prop_attr} data-type=\"blob\">{data_hash}</a>");
                    }
                    Some(other) => {
                        return Err(invalid(&format!("unknown inline data-type '{other}'")));
                    }
                    None => {
                        let child_canonical = self.extract_inlined(content.to_string()).await?;
                        let stored = self.store_exploded(&child_canonical).await?;
                        verify_hash(data_hash, stored.hash)?;
                        if let Some(id_hex) = data_id_hash {
                            let actual = stored
                                .id_hash
                                .map(|id| id.to_hex())
                                .unwrap_or_else(|| "none".to_string());
                            if actual != id_hex {
                                return Err(StoreError::ImplodeHashMismatch {
                                    expected: id_hex.to_string(),
                                    actual,
                                });
                            }
                            let _ = write!(out, "<a{prop_attr} data-type=\"id\">{id_hex}</a>");
                        } else {
                            let _ = write!(out, "<a{prop_attr} data-type=\"obj\">{data_hash}</a>");
                        }
                    }
                }
                rest = remainder;
            }
            out.push_str(rest);
            Ok(out)
        })
    }

    /// Store canonical microdata through the path its recipe requires.
    /// Versioned objects replay as merges so an explode never duplicates
    /// history.
    async fn store_exploded(&self, canonical: &str) -> Result<ExplodeResult> {
        let parsed = from_microdata(&self.registry, canonical)?;
        let recipe = self.registry.lookup(&parsed.object.type_name)?;
        if recipe.is_versioned() {
            let stored = self.store_versioned(&parsed.object, StoreAs::Merge).await?;
            Ok(ExplodeResult {
                hash: stored.hash,
                id_hash: Some(stored.id_hash),
                status: stored.status,
            })
        } else {
            let stored = self.store_unversioned(&parsed.object).await?;
            Ok(ExplodeResult {
                hash: stored.hash,
                id_hash: None,
                status: stored.status,
            })
        }
    }
}

fn verify_hash(expected_hex: &str, actual: Hash) -> Result<()> {
    if actual.to_hex() == expected_hex {
        Ok(())
    } else {
        Err(StoreError::ImplodeHashMismatch {
            expected: expected_hex.to_string(),
            actual: actual.to_hex(),
        })
    }
}

fn invalid(reason: &str) -> StoreError {
    StoreError::InvalidImploded {
        reason: reason.to_string(),
    }
}

/// Split `s` (positioned just after a wrapper's `>`) into the wrapper's
/// content and the remainder after its matching `</span>`. Counts every
/// nested span, wrapper or plain.
fn split_balanced_span(s: &str) -> Result<(&str, &str)> {
    let mut depth = 1usize;
    let mut pos = 0usize;
    loop {
        let open = s[pos..].find("<span");
        let close = s[pos..].find("</span>");
        match (open, close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                pos += o + "<span".len();
            }
            (_, Some(c)) => {
                depth -= 1;
                if depth == 0 {
                    let end = pos + c;
                    return Ok((&s[..end], &s[end + "</span>".len()..]));
                }
                pos += c + "</span>".len();
            }
            _ => return Err(invalid("unbalanced span nesting")),
        }
    }
}

fn attr_value<'x>(attrs: &'x str, name: &str) -> Option<&'x str> {
    let mut marker = String::with_capacity(name.len() + 2);
    marker.push_str(name);
    marker.push_str("=\"");
    let start = attrs.find(&marker)? + marker.len();
    let rest = &attrs[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_value_extracts() {
        let attrs = "itemprop=\"x\" data-hash=\"abc\"";
        assert_eq!(attr_value(attrs, "itemprop"), Some("x"));
        assert_eq!(attr_value(attrs, "data-hash"), Some("abc"));
        assert_eq!(attr_value(attrs, "data-id-hash"), None);
    }

    #[test]
    fn balanced_span_splitting() {
        let s = "a<span x>inner</span>b</span>rest";
        let (content, rest) = split_balanced_span(s).expect("split");
        assert_eq!(content, "a<span x>inner</span>b");
        assert_eq!(rest, "rest");
    }

    #[test]
    fn unbalanced_span_fails() {
        let err = split_balanced_span("<span>never closed").expect_err("must fail");
        assert_eq!(err.code(), "InvalidImploded");
    }
}
