//! Dotted-path extraction over decoded JSON values
//!
//! Paths traverse object keys only. Array indexing is unsupported by design:
//! configured paths never need indices, and array responses are fanned out
//! one level up by the renderer iterating elements.

use serde_json::Value;

/// Resolve a dot-separated path against a JSON value.
///
/// Returns `None` when any segment is missing, when an intermediate value is
/// an array or a scalar, or when the terminal value is JSON `null` (a decoded
/// null carries no data and is treated as absent everywhere downstream).
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            _ => return None,
        }
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Resolve a path to a numeric value, if it is one.
pub fn resolve_f64(value: &Value, path: &str) -> Option<f64> {
    resolve(value, path).and_then(Value::as_f64)
}
