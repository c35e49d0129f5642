//! Deterministic canonicalization for stable hashing (idempotency keys).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value into a canonical string: object keys sorted
/// recursively, no incidental whitespace. Two semantically-equal values
/// (same keys, same values, different insertion order) canonicalize to the
/// same string.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('"');
            out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Stable hash of `(kind, target, canonicalized params)`, used as an
/// idempotency key (spec §3, §4.E): equivalent actions hash identically
/// regardless of field insertion order in `params`.
pub fn stable_hash(kind: &str, target: &str, params: &Value) -> String {
    let canon = canonicalize(params);
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(target.as_bytes());
    hasher.update(b"\0");
    hasher.update(canon.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(stable_hash("shell", "host1", &a), stable_hash("shell", "host1", &b));
    }

    #[test]
    fn different_params_hash_differently() {
        let a = stable_hash("shell", "host1", &json!({"cmd": "restart"}));
        let b = stable_hash("shell", "host1", &json!({"cmd": "stop"}));
        assert_ne!(a, b);
    }

    #[test]
    fn different_target_hashes_differently_for_same_params() {
        let params = json!({"cmd": "restart"});
        let a = stable_hash("shell", "host1", &params);
        let b = stable_hash("shell", "host2", &params);
        assert_ne!(a, b);
    }
}
