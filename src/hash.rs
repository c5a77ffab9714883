//! Stable structural hashing of argument tuples.
//!
//! Cache keys and dump record keys are derived from the arguments a function
//! was called with. Two calls with structurally equal arguments must produce
//! the same key, even when object keys were built in a different order, so
//! values are serialized canonically (object keys sorted) before hashing.

// Rust guideline compliant 2026-03

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash an argument tuple into a stable hex key fragment.
pub fn arg_hash(args: &[Value]) -> String {
    let mut canonical = String::new();
    canonical.push('[');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_canonical(arg, &mut canonical);
    }
    canonical.push(']');

    use std::fmt::Write;
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Serialize a value with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json string escaping keeps the canonical form parseable
            out.push_str(&Value::String(s.clone()).to_string());
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
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable_for_equal_args() {
        let a = vec![json!(1), json!("x")];
        let b = vec![json!(1), json!("x")];
        assert_eq!(arg_hash(&a), arg_hash(&b));
    }

    #[test]
    fn test_hash_ignores_object_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"c":2,"d":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"d":3,"c":2},"a":1}"#).unwrap();
        assert_eq!(arg_hash(&[a]), arg_hash(&[b]));
    }

    #[test]
    fn test_hash_distinguishes_different_args() {
        assert_ne!(arg_hash(&[json!(1)]), arg_hash(&[json!(2)]));
        assert_ne!(arg_hash(&[json!([1, 2])]), arg_hash(&[json!([2, 1])]));
    }

    #[test]
    fn test_empty_args_hash() {
        assert_eq!(arg_hash(&[]), arg_hash(&[]));
        assert_ne!(arg_hash(&[]), arg_hash(&[json!(null)]));
    }
}
