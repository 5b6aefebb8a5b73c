//! Tool input normalization.

use serde_json::{Map, Value};

const KEY_TRIM: &[char] = &['"', '\'', '`'];

/// Normalize a formatted tool input before invocation.
///
/// Object keys lose surrounding whitespace and quote characters, at every
/// nesting level. A non-object input is wrapped as `{"input": value}`.
pub fn sanitize_input(value: Value) -> Value {
    match sanitize_keys(value) {
        Value::Object(map) => Value::Object(map),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            Value::Object(map)
        }
    }
}

fn sanitize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (clean_key(&key), sanitize_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_keys).collect()),
        other => other,
    }
}

fn clean_key(key: &str) -> String {
    let mut cleaned = key.trim();
    loop {
        let next = cleaned.trim_matches(KEY_TRIM).trim();
        if next == cleaned {
            return cleaned.to_string();
        }
        cleaned = next;
    }
}
