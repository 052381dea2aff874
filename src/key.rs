//! Tuple key layout and order-preserving byte encoding.
//!
//! Every key the crate ever writes through [`crate::kv::Store`] is a tuple of
//! [`KeyPart`]s encoded into a byte string whose lexicographic order matches the
//! tuple's logical order. This lets the executor express every query shape as a
//! single ordered-range scan over raw bytes.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A single ordered primitive inside a key or emit-key tuple.
///
/// Cross-type ordering follows `Bytes < String < Int < Float < Bool`, mirroring
/// the ordering rule of the upstream KV contract (see `Store`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KeyPart {
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl KeyPart {
    fn tag_ordering(&self) -> u8 {
        match self {
            KeyPart::Bytes(_) => 0,
            KeyPart::String(_) => 1,
            KeyPart::Int(_) => 2,
            KeyPart::Float(_) => 3,
            KeyPart::Bool(_) => 4,
        }
    }

    /// Order-preserving byte encoding of this part, escaped so parts can be
    /// concatenated unambiguously (see [`encode_tuple`]).
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag_ordering());
        match self {
            KeyPart::Bytes(b) => escape_into(b, out),
            KeyPart::String(s) => escape_into(s.as_bytes(), out),
            KeyPart::Int(i) => {
                // flip the sign bit so two's-complement order matches numeric order
                let flipped = (*i as u64) ^ (1u64 << 63);
                out.extend_from_slice(&flipped.to_be_bytes());
            }
            KeyPart::Float(f) => {
                out.extend_from_slice(&order_preserving_f64(*f).to_be_bytes());
            }
            KeyPart::Bool(b) => out.push(*b as u8),
        }
    }
}

fn order_preserving_f64(f: f64) -> u64 {
    let bits = f.to_bits();
    if f.is_sign_negative() {
        !bits
    } else {
        bits | (1u64 << 63)
    }
}

/// Escapes `0x00` as `0x00 0xff` and terminates with `0x00 0x00`, the FoundationDB
/// tuple-layer trick for concatenating variable-length parts into one comparable key.
fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

impl Eq for KeyPart {}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Bytes(a), KeyPart::Bytes(b)) => a.cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyPart::Int(a), KeyPart::Int(b)) => a.cmp(b),
            (KeyPart::Float(a), KeyPart::Float(b)) => a.total_cmp(b),
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            _ => self.tag_ordering().cmp(&other.tag_ordering()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::String(s.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::String(s)
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<f64> for KeyPart {
    fn from(f: f64) -> Self {
        KeyPart::Float(f)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

/// An ordered tuple of [`KeyPart`]s produced by a view's map function.
///
/// A bare scalar passed to `emit` is treated as a one-element tuple.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EmitKey(pub Vec<KeyPart>);

impl EmitKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        EmitKey(parts)
    }

    pub fn prefix_parts(&self, level: usize) -> &[KeyPart] {
        let n = level.min(self.0.len());
        &self.0[..n]
    }
}

impl From<&str> for EmitKey {
    fn from(s: &str) -> Self {
        EmitKey(vec![KeyPart::from(s)])
    }
}

impl From<String> for EmitKey {
    fn from(s: String) -> Self {
        EmitKey(vec![KeyPart::from(s)])
    }
}

impl From<i64> for EmitKey {
    fn from(i: i64) -> Self {
        EmitKey(vec![KeyPart::from(i)])
    }
}

impl From<f64> for EmitKey {
    fn from(f: f64) -> Self {
        EmitKey(vec![KeyPart::from(f)])
    }
}

impl From<bool> for EmitKey {
    fn from(b: bool) -> Self {
        EmitKey(vec![KeyPart::from(b)])
    }
}

impl From<Vec<KeyPart>> for EmitKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        EmitKey(parts)
    }
}

impl<const N: usize> From<[&str; N]> for EmitKey {
    fn from(parts: [&str; N]) -> Self {
        EmitKey(parts.iter().map(|s| KeyPart::from(*s)).collect())
    }
}

/// Encodes a tuple of parts into a single order-preserving byte string.
pub fn encode_tuple(parts: &[KeyPart]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        part.encode(&mut out);
    }
    out
}

/// `(ns, "doc", id)`
pub fn doc_key(ns: &str, id: &str) -> Vec<u8> {
    encode_tuple(&[KeyPart::from(ns), KeyPart::from("doc"), KeyPart::from(id)])
}

/// Prefix over every document key in `ns`: `(ns, "doc")`.
pub fn doc_prefix(ns: &str) -> Vec<u8> {
    encode_tuple(&[KeyPart::from(ns), KeyPart::from("doc")])
}

/// `(ns, "design", view)`
pub fn design_key(ns: &str, view: &str) -> Vec<u8> {
    encode_tuple(&[
        KeyPart::from(ns),
        KeyPart::from("design"),
        KeyPart::from(view),
    ])
}

/// Prefix over every row of `view`: `(ns, "view", view)`.
pub fn view_prefix(ns: &str, view: &str) -> Vec<u8> {
    encode_tuple(&[KeyPart::from(ns), KeyPart::from("view"), KeyPart::from(view)])
}

/// `(ns, "view", view, ...emit_key, doc_id)`
pub fn view_row_key(ns: &str, view: &str, emit_key: &EmitKey, doc_id: &str) -> Vec<u8> {
    let mut parts = vec![KeyPart::from(ns), KeyPart::from("view"), KeyPart::from(view)];
    parts.extend(emit_key.0.iter().cloned());
    parts.push(KeyPart::from(doc_id));
    encode_tuple(&parts)
}

/// Prefix over a view restricted to an emit-key prefix: `(ns, "view", view, ...prefix)`.
pub fn view_prefix_with(ns: &str, view: &str, prefix_parts: &[KeyPart]) -> Vec<u8> {
    let mut parts = vec![KeyPart::from(ns), KeyPart::from("view"), KeyPart::from(view)];
    parts.extend(prefix_parts.iter().cloned());
    encode_tuple(&parts)
}

/// Encodes `(ns, "view", view, ...emit_key)`, optionally appended with a trailing doc id,
/// used as a range bound by the executor.
pub fn view_bound(ns: &str, view: &str, emit_key_parts: &[KeyPart], doc_id: Option<&str>) -> Vec<u8> {
    let mut parts = vec![KeyPart::from(ns), KeyPart::from("view"), KeyPart::from(view)];
    parts.extend(emit_key_parts.iter().cloned());
    if let Some(id) = doc_id {
        parts.push(KeyPart::from(id));
    }
    encode_tuple(&parts)
}

/// Prefix over every back-reference of `view`: `(ns, "viewref", view)`.
pub fn viewref_prefix(ns: &str, view: &str) -> Vec<u8> {
    encode_tuple(&[
        KeyPart::from(ns),
        KeyPart::from("viewref"),
        KeyPart::from(view),
    ])
}

/// `(ns, "viewref", view, doc_id)`
pub fn viewref_key(ns: &str, view: &str, doc_id: &str) -> Vec<u8> {
    encode_tuple(&[
        KeyPart::from(ns),
        KeyPart::from("viewref"),
        KeyPart::from(view),
        KeyPart::from(doc_id),
    ])
}

/// Strips a known view-row prefix off an encoded key and returns the trailing
/// `(emit_key, doc_id)` pair. Only bytes produced by [`view_row_key`] are valid input.
pub fn decode_row_key(ns: &str, view: &str, raw: &[u8]) -> Option<(EmitKey, String)> {
    let prefix = view_prefix(ns, view);
    if !raw.starts_with(&prefix) {
        return None;
    }
    let mut parts = decode_tuple(&raw[prefix.len()..]);
    let doc_id = match parts.pop()? {
        KeyPart::String(s) => s,
        _ => return None,
    };
    Some((EmitKey(parts), doc_id))
}

fn decode_tuple(mut bytes: &[u8]) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    while !bytes.is_empty() {
        let tag = bytes[0];
        bytes = &bytes[1..];
        match tag {
            0 | 1 => {
                let (unescaped, rest) = unescape_one(bytes);
                bytes = rest;
                parts.push(if tag == 0 {
                    KeyPart::Bytes(unescaped)
                } else {
                    KeyPart::String(String::from_utf8_lossy(&unescaped).into_owned())
                });
            }
            2 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                bytes = &bytes[8..];
                let flipped = u64::from_be_bytes(buf) ^ (1u64 << 63);
                parts.push(KeyPart::Int(flipped as i64));
            }
            3 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                bytes = &bytes[8..];
                let bits = u64::from_be_bytes(buf);
                let restored = if bits & (1u64 << 63) != 0 {
                    bits & !(1u64 << 63)
                } else {
                    !bits
                };
                parts.push(KeyPart::Float(f64::from_bits(restored)));
            }
            4 => {
                parts.push(KeyPart::Bool(bytes[0] != 0));
                bytes = &bytes[1..];
            }
            _ => unreachable!("unknown key part tag {tag}"),
        }
    }
    parts
}

fn unescape_one(bytes: &[u8]) -> (Vec<u8>, &[u8]) {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        match (bytes.get(i), bytes.get(i + 1)) {
            (Some(0x00), Some(0x00)) => {
                return (out, &bytes[i + 2..]);
            }
            (Some(0x00), Some(0xff)) => {
                out.push(0x00);
                i += 2;
            }
            (Some(b), _) => {
                out.push(*b);
                i += 1;
            }
            _ => return (out, &bytes[i..]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_row_key() {
        let ek = EmitKey(vec![KeyPart::from("engineering"), KeyPart::from("Alice")]);
        let raw = view_row_key("default", "by-dept-name", &ek, "alice");
        let (decoded_key, decoded_id) = decode_row_key("default", "by-dept-name", &raw).unwrap();
        assert_eq!(decoded_key, ek);
        assert_eq!(decoded_id, "alice");
    }

    #[test]
    fn ordering_matches_type_precedence() {
        let a = KeyPart::Bytes(vec![1]);
        let b = KeyPart::from("x");
        let c = KeyPart::Int(5);
        let d = KeyPart::Float(1.0);
        let e = KeyPart::Bool(true);
        assert!(a < b && b < c && c < d && d < e);
    }

    #[test]
    fn int_ordering_preserved_under_encoding() {
        let neg = encode_tuple(&[KeyPart::Int(-5)]);
        let pos = encode_tuple(&[KeyPart::Int(5)]);
        assert!(neg < pos);
    }

    #[test]
    fn string_prefix_scan_bound() {
        let p1 = encode_tuple(&[KeyPart::from("engineering")]);
        let p2 = encode_tuple(&[KeyPart::from("engineering"), KeyPart::from("Alice")]);
        assert!(p1 < p2);
    }
}
