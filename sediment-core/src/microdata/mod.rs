//! The canonical microdata wire format.
//!
//! Objects serialize to an HTML-shaped text form with a prefix-free grammar:
//! the serializer ([`ser`]) emits exactly one canonical rendering per value
//! tree, and the parser ([`de`]) consumes it in a single forward pass without
//! lookahead. The content hash of an object is the SHA-256 of this text, so
//! any variance here corrupts identity.

pub mod de;
pub mod ser;

pub use de::{from_microdata, peek_type_name, ParsedObject};
pub use ser::{to_id_microdata, to_microdata};

/// The literal `itemtype` URI prefix of every outer frame.
pub const ITEMTYPE_PREFIX: &str = "//refin.io/";

/// The outer-frame attribute marking an identity record.
pub const ID_OBJECT_ATTR: &str = "data-id-object=\"true\"";

/// Escape `< > & "` for embedding in microdata text.
pub(crate) fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, text);
    out
}

/// Invert [`escape`]. Unknown entities pass through verbatim.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let mut matched = false;
        for (entity, ch) in [("&lt;", '<'), ("&gt;", '>'), ("&amp;", '&'), ("&quot;", '"')] {
            if rest.starts_with(entity) {
                out.push(ch);
                rest = &rest[entity.len()..];
                matched = true;
                break;
            }
        }
        if !matched {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}
