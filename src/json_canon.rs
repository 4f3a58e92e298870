//! Canonical JSON encoding.
//!
//! Every persisted artifact and every fingerprint input is serialized
//! through this module: object keys are sorted, floating-point numbers are
//! rounded to at most six decimal places, and the result is a stable UTF-8
//! string with no BOM. This is what makes fingerprints and artifact bytes
//! reproducible across runs (spec Testable Properties 5 and 7).

use serde::Serialize;
use serde_json::{Map, Value};

/// Round a float to at most six decimal places, the way every timestamp
/// and score in the data model is persisted.
pub fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

/// Recursively canonicalize a `serde_json::Value`: sort object keys and
/// round numbers to six decimals.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_i64() || n.is_u64() {
                    value.clone()
                } else {
                    serde_json::Number::from_f64(round6(f))
                        .map(Value::Number)
                        .unwrap_or_else(|| value.clone())
                }
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

/// Serialize `v` to a canonical JSON value (sorted keys, rounded floats).
pub fn canonical_value<T: Serialize>(v: &T) -> Result<Value, serde_json::Error> {
    let raw = serde_json::to_value(v)?;
    Ok(canonicalize(&raw))
}

/// Serialize `v` to a canonical JSON string (sorted keys, rounded floats,
/// no extraneous whitespace beyond what `serde_json` emits for compact
/// output). Used for fingerprint inputs, where byte-stability matters more
/// than readability.
pub fn canonical_string<T: Serialize>(v: &T) -> Result<String, serde_json::Error> {
    let canon = canonical_value(v)?;
    serde_json::to_string(&canon)
}

/// Serialize `v` to a canonical, pretty-printed JSON string for on-disk
/// artifacts, where a human may want to read the file directly.
pub fn canonical_pretty<T: Serialize>(v: &T) -> Result<String, serde_json::Error> {
    let canon = canonical_value(v)?;
    serde_json::to_string_pretty(&canon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let v = json!({"b": 1, "a": 2});
        let canon = canonicalize(&v);
        let s = serde_json::to_string(&canon).unwrap();
        assert_eq!(s, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn rounds_floats_to_six_decimals() {
        let v = json!({"t": 1.0000001234});
        let canon = canonicalize(&v);
        assert_eq!(canon["t"], json!(1.000000));
    }

    #[test]
    fn fixed_point_round_trip() {
        let v = json!({"z": 1, "a": [3, 2, 1], "m": {"y": 1, "x": 2}});
        let once = canonicalize(&v);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn same_key_order_any_input_same_hash() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(
            canonical_string(&a).unwrap(),
            canonical_string(&b).unwrap()
        );
    }
}
