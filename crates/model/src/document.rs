//! Dotted-path helpers over JSON documents.
//!
//! Sub-document operations address fields as `a.b.c`; validation compares
//! documents after flattening them into the same path space.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flattens nested objects into `path -> leaf` pairs.
///
/// Arrays and scalars are leaves. An empty object is kept as a leaf so that
/// its presence still shows up in comparisons.
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = value {
        flatten_into(map, "", &mut out);
    }
    out
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, &path, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

/// Sets `path`, creating intermediate objects. Returns false when an
/// intermediate segment exists but is not an object.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Removes `path`, returning the removed value. Empty parents are kept.
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => {
            let parent = parent
                .split('.')
                .try_fold(doc, |current, segment| current.as_object_mut()?.get_mut(segment))?;
            parent.as_object_mut()?.remove(leaf)
        }
        None => doc.as_object_mut()?.remove(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects() {
        let doc = json!({"a": 1, "b": {"c": "x", "d": {"e": [1, 2]}}, "f": {}});
        let flat = flatten(&doc);
        assert_eq!(flat.get("a"), Some(&json!(1)));
        assert_eq!(flat.get("b.c"), Some(&json!("x")));
        assert_eq!(flat.get("b.d.e"), Some(&json!([1, 2])));
        assert_eq!(flat.get("f"), Some(&json!({})));
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn set_get_remove_round() {
        let mut doc = json!({"name": "n"});
        assert!(set_path(&mut doc, "sub.deep.value", json!(7)));
        assert_eq!(get_path(&doc, "sub.deep.value"), Some(&json!(7)));
        assert_eq!(remove_path(&mut doc, "sub.deep.value"), Some(json!(7)));
        assert_eq!(get_path(&doc, "sub.deep.value"), None);
        assert_eq!(remove_path(&mut doc, "name"), Some(json!("n")));
    }

    #[test]
    fn set_path_refuses_to_descend_into_scalars() {
        let mut doc = json!({"a": 1});
        assert!(!set_path(&mut doc, "a.b", json!(2)));
        assert_eq!(doc, json!({"a": 1}));
    }
}
