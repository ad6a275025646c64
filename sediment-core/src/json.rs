//! Canonical JSON rendering for stringifiable properties.
//!
//! The canonical form is a pure function of the JSON value: object keys are
//! sorted by UTF-16 code units, floats use shortest round-trip formatting,
//! and strings use standard JSON escaping. Do not hash any other JSON
//! rendering; whitespace or key-order variance would change the content
//! hash.

use core::cmp::Ordering;

use serde_json::Value as Json;

/// Render `value` in canonical form.
pub fn canonical_json(value: &Json) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Json) {
    match value {
        Json::Null => out.push_str("null"),
        Json::Bool(true) => out.push_str("true"),
        Json::Bool(false) => out.push_str("false"),
        // serde_json renders integers plainly and floats via shortest
        // round-trip (ryu), which is the canonical form here.
        Json::Number(n) => out.push_str(&n.to_string()),
        Json::String(s) => write_string(out, s),
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| utf16_cmp(a, b));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                // Key came out of the map above.
                if let Some(v) = map.get(*key) {
                    write_value(out, v);
                }
            }
            out.push('}');
        }
    }
}

/// Compare two strings by their UTF-16 code unit sequences.
///
/// This differs from byte order only for strings mixing supplementary-plane
/// characters with code points at or above U+E000, but the difference is
/// observable in content hashes, so it is fixed here.
fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
