//! Cache key fingerprints
//!
//! Keys have the form `{prefix}:{sha256-hex}`. Structured payloads are hashed
//! in a canonical JSON form with object keys sorted at every level, so two
//! payloads that differ only in key order or whitespace share a key.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Fingerprint a JSON payload.
pub fn fingerprint(prefix: &str, payload: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    with_prefix(prefix, Sha256::digest(canonical.as_bytes()).as_slice())
}

/// Fingerprint any serializable payload.
pub fn fingerprint_of<T: Serialize + ?Sized>(prefix: &str, payload: &T) -> Result<String> {
    Ok(fingerprint(prefix, &serde_json::to_value(payload)?))
}

/// Fingerprint a vector query: the little-endian bytes of every component
/// followed by `top_k` and `threshold`.
pub fn query_fingerprint(prefix: &str, vector: &[f32], top_k: usize, threshold: f32) -> String {
    let mut hasher = Sha256::new();
    for x in vector {
        hasher.update(x.to_le_bytes());
    }
    hasher.update((top_k as u64).to_le_bytes());
    hasher.update(threshold.to_le_bytes());
    with_prefix(prefix, hasher.finalize().as_slice())
}

fn with_prefix(prefix: &str, digest: &[u8]) -> String {
    format!("{}:{}", prefix, hex::encode(digest))
}

/// Serialize with object keys sorted recursively and no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":null,"y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(fingerprint("q", &a), fingerprint("q", &b));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            fingerprint("q", &json!([1, 2])),
            fingerprint("q", &json!([2, 1]))
        );
    }

    #[test]
    fn test_key_shape() {
        let key = fingerprint("search", &json!({"q": "cat"}));
        let (prefix, digest) = key.split_once(':').unwrap();
        assert_eq!(prefix, "search");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_of_struct() {
        #[derive(Serialize)]
        struct Query {
            top_k: usize,
            label: &'static str,
        }
        let key = fingerprint_of("q", &Query { top_k: 5, label: "x" }).unwrap();
        assert_eq!(key, fingerprint("q", &json!({"label": "x", "top_k": 5})));
    }

    #[test]
    fn test_query_fingerprint_sensitivity() {
        let v = [0.1f32, 0.2, 0.3];
        let base = query_fingerprint("search", &v, 10, 0.0);
        assert_eq!(base, query_fingerprint("search", &v, 10, 0.0));
        assert_ne!(base, query_fingerprint("search", &v, 11, 0.0));
        assert_ne!(base, query_fingerprint("search", &v, 10, 0.5));
        assert_ne!(base, query_fingerprint("search", &[0.1, 0.2, 0.31], 10, 0.0));
        assert!(base.starts_with("search:"));
    }
}
