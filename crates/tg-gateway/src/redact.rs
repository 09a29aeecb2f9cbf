//! Output redaction.
//!
//! Applied to every tool result before it reaches the model. Account-like
//! identifiers keep only a short suffix; anything credential-shaped is
//! replaced wholesale.

use serde_json::Value;

const SUFFIX_KEYS: &[&str] = &["account_id", "account"];
const WHOLESALE_MARKERS: &[&str] = &["token", "credential", "password", "secret", "api_key"];

pub const REDACTED: &str = "[REDACTED]";

/// Recursively redact a JSON document in place.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_wholesale(key) {
                    *v = Value::String(REDACTED.to_string());
                } else if is_suffix_only(key) {
                    if let Value::String(s) = v {
                        *s = mask_suffix(s);
                    }
                } else {
                    redact(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

/// Convenience wrapper returning the redacted copy.
pub fn redacted(mut value: Value) -> Value {
    redact(&mut value);
    value
}

fn is_suffix_only(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    SUFFIX_KEYS.iter().any(|s| k == *s)
}

fn is_wholesale(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    WHOLESALE_MARKERS.iter().any(|m| k.contains(m))
}

/// Keep the last four characters: "DU123456" -> "***3456".
fn mask_suffix(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("***{suffix}")
}
