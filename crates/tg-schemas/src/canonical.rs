//! Canonical JSON and hashing helpers.
//!
//! Canonical form = recursively sorted object keys, compact encoding, one
//! value per string. Equal values always produce identical bytes, so a
//! SHA-256 over the canonical form is a stable content address. Decimals
//! serialize as JSON strings, which keeps the form platform-independent.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
#[error("canonical serialization failed: {0}")]
pub struct CanonicalError(#[from] serde_json::Error);

impl CanonicalError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Serialize a value to canonical JSON (sorted keys, compact).
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String, CanonicalError> {
    let raw = serde_json::to_value(v)?;
    let sorted = sort_keys(&raw);
    Ok(serde_json::to_string(&sorted)?)
}

/// SHA-256 of the given bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sort_keys(v: &Value) -> Value {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": [ {"k": 2, "a": 1} ]}});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"a":{"m":[{"a":1,"k":2}],"z":true},"b":1}"#);
    }

    #[test]
    fn canonical_json_is_stable_across_reruns() {
        let v = json!({"x": "1.50", "y": null, "z": ["a", "b"]});
        let first = canonical_json(&v).unwrap();
        for _ in 0..10 {
            assert_eq!(canonical_json(&v).unwrap(), first);
        }
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        // sha256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
