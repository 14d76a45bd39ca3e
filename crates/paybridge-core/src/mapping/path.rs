//! Dotted-path addressing into a [`serde_json::Value`] tree, per SPEC_FULL.md
//! §4.B's path model. Paths address nested object keys and list indices;
//! a trailing `[]` segment denotes "for each element" and is resolved by the
//! caller (the mapping engine), not by this module.

use serde_json::{Map, Value};

/// Splits `a.b.c` into `["a", "b", "c"]`. An empty path yields an empty slice.
fn segments(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Reads the value at `path`, or `None` if any intermediate segment is
/// absent or not a container.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments(path) {
        current = match (current, segment.parse::<usize>()) {
            (Value::Array(items), Ok(index)) => items.get(index)?,
            (Value::Object(map), _) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects as needed.
/// Per §4.B, clauses only ever overwrite — there is no path-removal API.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segs = segments(path);
    if segs.is_empty() {
        *root = value;
        return;
    }
    set_recursive(root, &segs, value);
}

fn set_recursive(current: &mut Value, segments: &[&str], value: Value) {
    let (head, rest) = match segments.split_first() {
        Some(pair) => pair,
        None => {
            *current = value;
            return;
        }
    };

    if !current.is_object() && !current.is_array() {
        *current = Value::Object(Map::new());
    }

    if let Ok(index) = head.parse::<usize>() {
        if !current.is_array() {
            *current = Value::Array(Vec::new());
        }
        let items = current.as_array_mut().expect("just coerced to array");
        while items.len() <= index {
            items.push(Value::Null);
        }
        if rest.is_empty() {
            items[index] = value;
        } else {
            set_recursive(&mut items[index], rest, value);
        }
        return;
    }

    let map = current.as_object_mut().expect("just coerced to object");
    if rest.is_empty() {
        map.insert(head.to_string(), value);
    } else {
        let entry = map.entry(head.to_string()).or_insert(Value::Object(Map::new()));
        set_recursive(entry, rest, value);
    }
}

/// True if `path` resolves to a present, non-null value.
pub fn exists(root: &Value, path: &str) -> bool {
    !matches!(get(root, path), None | Some(Value::Null))
}
