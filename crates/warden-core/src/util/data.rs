//! JSON value helpers.

use serde_json::Value;
use warden_types::{Result, WardenError};

/// Deep merge two values.
/// Recursively merges objects, with overlay values taking precedence.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    match (&mut base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if let Some(base_val) = base_map.get_mut(&key) {
                    *base_val = deep_merge(base_val.take(), overlay_val);
                } else {
                    base_map.insert(key, overlay_val);
                }
            }
            base
        }
        (_, overlay_val) => overlay_val,
    }
}

/// Get value at a path in dotted notation.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// Set value at a path in dotted notation, creating intermediate objects.
pub fn set_path(data: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err(WardenError::Config("Empty path".to_string()));
    };

    let mut current = data;
    for part in parents {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .map(|obj| obj.entry(part.to_string()).or_insert_with(|| Value::Object(Default::default())))
            .ok_or_else(|| WardenError::Bug(format!("expected object at '{}'", part)))?;
    }

    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    if let Some(obj) = current.as_object_mut() {
        obj.insert(last.to_string(), value);
    }

    Ok(())
}
