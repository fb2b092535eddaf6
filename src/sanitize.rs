//! Scrub the render context before it enters the JavaScript engine.
//!
//! Query strings and headers are client-controlled. Keys like `__proto__`
//! would pollute `Object.prototype` inside the server bundle, so they are
//! dropped on the way in.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

/// Maximum recursion depth for nested objects/arrays
const MAX_DEPTH: usize = 32;

/// Keys that could be used for prototype pollution
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Recursively remove dangerous keys from a context value.
///
/// # Errors
/// Returns an error if nesting depth exceeds MAX_DEPTH (32).
pub fn sanitize_context(value: Value) -> Result<Value> {
    sanitize_recursive(value, 0, "")
}

fn sanitize_recursive(value: Value, depth: usize, path: &str) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(anyhow!(
            "Render context nesting too deep (max {} levels)",
            MAX_DEPTH
        ));
    }

    match value {
        Value::Object(map) => {
            let mut sanitized = Map::with_capacity(map.len());
            for (key, val) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, path = %path, "dropping dangerous key from render context");
                    continue;
                }
                let child = format!("{path}.{key}");
                sanitized.insert(key, sanitize_recursive(val, depth + 1, &child)?);
            }
            Ok(Value::Object(sanitized))
        }
        Value::Array(arr) => {
            let sanitized: Result<Vec<Value>> = arr
                .into_iter()
                .enumerate()
                .map(|(i, v)| sanitize_recursive(v, depth + 1, &format!("{path}[{i}]")))
                .collect();
            Ok(Value::Array(sanitized?))
        }
        other => Ok(other),
    }
}
