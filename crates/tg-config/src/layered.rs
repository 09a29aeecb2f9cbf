//! Layered YAML config loading.
//!
//! Files merge in order (later overrides earlier, objects deep-merge,
//! arrays replace), then the merged document is canonicalized and hashed so
//! the exact effective configuration can be recorded in the audit log.

use serde_json::Value;

use tg_schemas::{canonical_json, sha256_hex};

use crate::ConfigError;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize and hash.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig, ConfigError> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = std::fs::read_to_string(p)?;
        let yaml_val: serde_yaml::Value = serde_yaml::from_str(&s)?;
        let json_val = serde_json::to_value(yaml_val)
            .expect("yaml to json conversion cannot fail for parsed documents");
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonical_json(&merged).expect("merged config serialization is infallible");
    let hash = sha256_hex(canonical.as_bytes());

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars
/// overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_override_and_objects_deep_merge() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let over = dir.path().join("override.yaml");
        std::fs::write(&base, "server:\n  port: 8080\n  host: 0.0.0.0\nlimits:\n  tools: 60\n").unwrap();
        std::fs::write(&over, "server:\n  port: 9090\n").unwrap();

        let loaded =
            load_layered_yaml(&[base.to_str().unwrap(), over.to_str().unwrap()]).unwrap();
        assert_eq!(loaded.config_json["server"]["port"], json!(9090));
        assert_eq!(loaded.config_json["server"]["host"], json!("0.0.0.0"));
        assert_eq!(loaded.config_json["limits"]["tools"], json!(60));
        assert_eq!(loaded.config_hash.len(), 64);
    }

    #[test]
    fn hash_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        std::fs::write(&a, "x: 1\n").unwrap();
        let first = load_layered_yaml(&[a.to_str().unwrap()]).unwrap();
        std::fs::write(&a, "x: 2\n").unwrap();
        let second = load_layered_yaml(&[a.to_str().unwrap()]).unwrap();
        assert_ne!(first.config_hash, second.config_hash);
    }
}
