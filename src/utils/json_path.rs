//! JSON path probing over loosely-shaped payloads.

use serde_json::Value;

/// Extract a value from nested JSON using dot-notation path.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => {
                if let Ok(idx) = key.parse::<usize>() {
                    arr.get(idx).unwrap_or(&Value::Null)
                } else {
                    &Value::Null
                }
            }
            _ => &Value::Null,
        };
    }

    current
}

/// True for `null` and for strings that are empty after trimming.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Probe an ordered alias list and return the first defined, non-blank value.
///
/// Aliases may be dotted paths (`variant.size`).
pub fn first_present<'a>(data: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .map(|alias| extract_path(data, alias))
        .find(|value| !is_blank(value))
}
