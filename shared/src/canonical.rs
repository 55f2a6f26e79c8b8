//! Deterministic, implementation-independent byte encoding for hashing.
//!
//! `serde_json` is great for wire transport but is not an acceptable
//! hashing substrate: field order, float formatting and whitespace are
//! all free to vary between serializers. Every value that ends up inside
//! a `Hash256::sha3_256` call in this crate goes through [`CanonicalValue`]
//! instead, which has exactly one byte representation per logical value.
//!
//! Encoding rules: unsigned/signed integers are decimal ASCII, strings are
//! length-prefixed UTF-8, sequences are a length prefix followed by the
//! concatenation of their elements' encodings, and maps are a length
//! prefix followed by `key=value` pairs in ascending key order.

use std::collections::BTreeMap;

/// A value that can be canonically encoded for hashing.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<CanonicalValue>),
    /// Keys are sorted lexicographically before encoding, regardless of
    /// insertion order, so two maps with the same entries always encode
    /// identically.
    Map(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    #[must_use]
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Inserts a key into a `Map` variant. Panics if called on a
    /// non-map value, since that is always a programmer error at the
    /// call site.
    pub fn insert(&mut self, key: impl Into<String>, value: CanonicalValue) -> &mut Self {
        match self {
            Self::Map(m) => {
                m.insert(key.into(), value);
            }
            _ => panic!("CanonicalValue::insert called on a non-map variant"),
        }
        self
    }

    /// Encodes this value into the deterministic byte form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::UInt(n) => format!("u{n};").into_bytes(),
            Self::Int(n) => format!("i{n};").into_bytes(),
            // Rust's `f64` Display is shortest-round-trip and deterministic
            // for a given value, so it is stable across calls and hosts.
            Self::Float(f) => format!("f{f};").into_bytes(),
            Self::Bool(b) => format!("b{};", u8::from(*b)).into_bytes(),
            Self::Str(s) => {
                let bytes = s.as_bytes();
                let mut out = format!("s{}:", bytes.len()).into_bytes();
                out.extend_from_slice(bytes);
                out.push(b';');
                out
            }
            Self::Bytes(b) => {
                let mut out = format!("x{}:", b.len()).into_bytes();
                out.extend_from_slice(&hex::encode(b).into_bytes());
                out.push(b';');
                out
            }
            Self::Seq(items) => {
                let mut out = format!("[{}:", items.len()).into_bytes();
                for item in items {
                    out.extend_from_slice(&item.encode());
                }
                out.push(b']');
                out
            }
            Self::Map(entries) => {
                let mut out = format!("{{{}:", entries.len()).into_bytes();
                for (key, value) in entries {
                    out.extend_from_slice(&CanonicalValue::Str(key.clone()).encode());
                    out.push(b'=');
                    out.extend_from_slice(&value.encode());
                }
                out.push(b'}');
                out
            }
        }
    }
}

/// Implemented by every type whose hash is defined over its canonical
/// encoding rather than over `serde_json`.
pub trait Canonical {
    fn to_canonical(&self) -> CanonicalValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_order_does_not_affect_encoding() {
        let mut a = CanonicalValue::map();
        a.insert("b", CanonicalValue::UInt(2));
        a.insert("a", CanonicalValue::UInt(1));

        let mut b = CanonicalValue::map();
        b.insert("a", CanonicalValue::UInt(1));
        b.insert("b", CanonicalValue::UInt(2));

        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn sequence_encoding_is_length_prefixed() {
        let seq = CanonicalValue::Seq(vec![CanonicalValue::UInt(1), CanonicalValue::UInt(2)]);
        let encoded = seq.encode();
        assert!(encoded.starts_with(b"[2:"));
        assert!(encoded.ends_with(b"]"));
    }

    #[test]
    fn distinct_strings_never_collide_on_concatenation() {
        // Without length-prefixing, {"ab", "c"} and {"a", "bc"} would
        // encode identically. With it, they must not.
        let a = CanonicalValue::Seq(vec![
            CanonicalValue::Str("ab".into()),
            CanonicalValue::Str("c".into()),
        ]);
        let b = CanonicalValue::Seq(vec![
            CanonicalValue::Str("a".into()),
            CanonicalValue::Str("bc".into()),
        ]);
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn encoding_is_deterministic_across_calls() {
        let mut m = CanonicalValue::map();
        m.insert("weight", CanonicalValue::Float(0.95));
        m.insert("tier", CanonicalValue::Str("GOVERNMENT".into()));
        assert_eq!(m.encode(), m.encode());
    }
}
