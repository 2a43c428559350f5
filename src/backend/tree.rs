//! Local mirror of a JSON node, kept in step with streamed `put` and `patch`
//! events. Paths are slash separated and relative to the streamed node.

use serde_json::{Map, Value};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Replace the value at `path`. `null` removes it.
pub fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    let mut node = root;
    for segment in parents {
        if data.is_null() && node.get(*segment).is_none() {
            return;
        }
        node = object_mut(node)
            .entry((*segment).to_string())
            .or_insert(Value::Null);
    }

    if data.is_null() {
        if let Value::Object(map) = node {
            map.remove(*last);
        }
    } else {
        object_mut(node).insert((*last).to_string(), data);
    }
}

/// Merge every child of `data` into the node at `path`.
pub fn apply_patch(root: &mut Value, path: &str, data: Value) {
    let Value::Object(children) = data else {
        apply_put(root, path, data);
        return;
    };

    let base = path.trim_end_matches('/');
    for (key, value) in children {
        apply_put(root, &format!("{}/{}", base, key), value);
    }
}

/// Coerce `node` into an object, discarding any scalar it held.
fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}
