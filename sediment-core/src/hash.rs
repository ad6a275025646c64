//! Content hashes and identity hashes.
//!
//! Both hash kinds are SHA-256 digests over UTF-8 bytes of canonical
//! microdata. They share the same 32-byte layout but are deliberately
//! distinct types: a [`Hash`] addresses immutable content, an [`IdHash`]
//! addresses a versioned identity, and mixing them up corrupts lookups.
//!
//! Human-readable encoding is always 64 lowercase hex chars. Uppercase input
//! is rejected on parse.

use core::fmt;
use core::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Length of a hash rendered as lowercase hex.
pub const HASH_HEX_LEN: usize = 64;

const HEX_LOWER: &[u8; 16] = b"0123456789abcdef";

fn hex_lower(bytes: &[u8; 32]) -> String {
    let mut out = String::with_capacity(HASH_HEX_LEN);
    for b in bytes {
        out.push(HEX_LOWER[(b >> 4) as usize] as char);
        out.push(HEX_LOWER[(b & 0x0f) as usize] as char);
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    // Lowercase only: the canonical form never contains uppercase hex.
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn parse_hex_256(s: &str) -> Option<[u8; 32]> {
    if s.len() != HASH_HEX_LEN {
        return None;
    }
    let bytes = s.as_bytes();
    let mut out = [0u8; 32];
    for i in 0..32 {
        let hi = hex_digit(bytes[i * 2])?;
        let lo = hex_digit(bytes[i * 2 + 1])?;
        out[i] = (hi << 4) | lo;
    }
    Some(out)
}

fn bad_hash(input: &str) -> CoreError {
    let mut input = input.to_string();
    if input.len() > 80 {
        input.truncate(80);
    }
    CoreError::BadHashString { input }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

/// SHA-256 content hash of a canonical microdata serialization, a CLOB's
/// UTF-8 bytes, or a BLOB's raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the SHA-256 digest of `bytes`.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(sha256(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex_lower(&self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_256(s).map(Self).ok_or_else(|| bad_hash(s))
    }
}

/// SHA-256 of the identity microdata of a versioned object.
///
/// All versions of an identity share the same `IdHash`; it is the key of the
/// version DAG head pointer, never of a content file (except the id-object
/// record itself).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdHash([u8; 32]);

impl IdHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the SHA-256 digest of `bytes`.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(sha256(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex_lower(&self.0)
    }
}

impl fmt::Display for IdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for IdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdHash({})", self.to_hex())
    }
}

impl FromStr for IdHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_256(s).map(Self).ok_or_else(|| bad_hash(s))
    }
}

/// Check that a string has the canonical hash shape (`^[0-9a-f]{64}$`).
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| hex_digit(b).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = Hash::digest(b"hello");
        let b = Hash::digest(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), HASH_HEX_LEN);
    }

    #[test]
    fn known_sha256_vector() {
        // SHA-256 of the empty string.
        let h = Hash::digest(b"");
        assert_eq!(
            h.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::digest(b"round trip");
        let parsed: Hash = h.to_hex().parse().expect("valid hex");
        assert_eq!(h, parsed);
    }

    #[test]
    fn uppercase_is_rejected() {
        let upper = Hash::digest(b"x").to_hex().to_uppercase();
        assert!(upper.parse::<Hash>().is_err());
        assert!(!is_hash_hex(&upper));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!("abc".parse::<Hash>().is_err());
        assert!("".parse::<IdHash>().is_err());
    }

    #[test]
    fn id_hash_and_hash_are_distinct_types_with_same_encoding() {
        let h = Hash::digest(b"payload");
        let i = IdHash::from_bytes(*h.as_bytes());
        assert_eq!(h.to_hex(), i.to_hex());
    }
}
