//! Canonical JSON + SHA-256 helpers.
//!
//! Canonical form: object keys sorted recursively, compact separators, no
//! trailing newline. Every hash in the workspace (risk records, settings,
//! incident chain) is computed over this form so that key order in the
//! source document never changes a digest.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `v` to canonical JSON.
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("canonical json: serialize failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("canonical json: stringify failed")
}

/// Recursively rebuild `v` with object keys in lexicographic order.
pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Lowercase hex SHA-256 of `bytes` (64 chars).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compare two hex digests without early exit on the first differing byte.
pub fn digests_match(a: &str, b: &str) -> bool {
    let a = a.trim().as_bytes();
    let b = b.trim().as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x.to_ascii_lowercase() ^ y.to_ascii_lowercase()))
        == 0
}
