//! Dot-notation get/set/delete/extract on `Value` trees (spec §4.1). Pure
//! functions — no shared state, no mutation of inputs.

use crate::value::Value;
use indexmap::IndexMap;

/// Split a dot path into segments. `""` and `"."` both denote the root.
fn segments(path: &str) -> Vec<&str> {
    if path.is_empty() || path == "." {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

pub fn get<'a>(obj: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = segments(path);
    let mut cur = obj;
    for part in parts {
        match cur {
            Value::Map(m) => cur = m.get(part)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Creates intermediate maps as needed. Refuses to set the root (no-op).
pub fn set(obj: &mut Value, path: &str, value: Value) {
    let parts = segments(path);
    if parts.is_empty() {
        return;
    }
    let mut cur = obj;
    for part in &parts[..parts.len() - 1] {
        if !matches!(cur, Value::Map(_)) {
            *cur = Value::Map(IndexMap::new());
        }
        let Value::Map(m) = cur else { unreachable!() };
        cur = m
            .entry((*part).to_string())
            .or_insert_with(|| Value::Map(IndexMap::new()));
    }
    if !matches!(cur, Value::Map(_)) {
        *cur = Value::Map(IndexMap::new());
    }
    if let Value::Map(m) = cur {
        m.insert(parts[parts.len() - 1].to_string(), value);
    }
}

/// No-ops on missing paths. Refuses to delete the root (no-op).
pub fn del(obj: &mut Value, path: &str) {
    let parts = segments(path);
    if parts.is_empty() {
        return;
    }
    let mut cur = obj;
    for part in &parts[..parts.len() - 1] {
        match cur {
            Value::Map(m) => match m.get_mut(*part) {
                Some(next) => cur = next,
                None => return,
            },
            _ => return,
        }
    }
    if let Value::Map(m) = cur {
        m.shift_remove(parts[parts.len() - 1]);
    }
}

/// Extract `extractPaths` out of `response`, returning `(extracted, residual)`.
/// See spec §4.1 for the three-way branching on root extraction / preserve
/// paths.
pub fn extract(
    response: &Value,
    extract_paths: &[String],
    preserve_paths: &[String],
) -> (IndexMap<String, Value>, Value) {
    if extract_paths.is_empty() {
        return (IndexMap::new(), response.clone());
    }

    let mut extracted = IndexMap::new();
    for path in extract_paths {
        if let Some(v) = get(response, path) {
            extracted.insert(path.clone(), v.clone());
        }
    }

    let root_extracted = extract_paths.iter().any(|p| {
        let s = segments(p);
        s.is_empty()
    });

    let residual = if root_extracted {
        rebuild_from_paths(response, preserve_paths)
    } else if !preserve_paths.is_empty() {
        rebuild_from_paths(response, preserve_paths)
    } else {
        let mut residual = response.clone();
        for path in extract_paths {
            del(&mut residual, path);
        }
        residual
    };

    (extracted, residual)
}

fn rebuild_from_paths(response: &Value, paths: &[String]) -> Value {
    let mut residual = Value::Map(IndexMap::new());
    for path in paths {
        if let Some(v) = get(response, path) {
            set(&mut residual, path, v.clone());
        }
    }
    residual
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        j.into()
    }

    #[test]
    fn get_nested() {
        let obj = v(json!({"a": {"b": {"c": 42}}}));
        assert_eq!(get(&obj, "a.b.c"), Some(&Value::Number(42.0)));
        assert_eq!(get(&obj, "a.b.missing"), None);
        assert_eq!(get(&obj, "a.x.c"), None);
    }

    #[test]
    fn get_root() {
        let obj = v(json!({"a": 1}));
        assert_eq!(get(&obj, ""), Some(&obj));
        assert_eq!(get(&obj, "."), Some(&obj));
    }

    #[test]
    fn set_creates_intermediate() {
        let mut obj = v(json!({}));
        set(&mut obj, "a.b.c", Value::Number(1.0));
        assert_eq!(get(&obj, "a.b.c"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn set_root_is_noop() {
        let mut obj = v(json!({"a": 1}));
        let before = obj.clone();
        set(&mut obj, "", Value::Number(99.0));
        set(&mut obj, ".", Value::Number(99.0));
        assert_eq!(obj, before);
    }

    #[test]
    fn del_missing_is_noop() {
        let mut obj = v(json!({"a": 1}));
        let before = obj.clone();
        del(&mut obj, "b.c");
        assert_eq!(obj, before);
    }

    #[test]
    fn del_root_is_noop() {
        let mut obj = v(json!({"a": 1}));
        let before = obj.clone();
        del(&mut obj, "");
        assert_eq!(obj, before);
    }

    #[test]
    fn extract_empty_paths_is_noop() {
        let resp = v(json!({"a": 1, "b": 2}));
        let (map, residual) = extract(&resp, &[], &[]);
        assert!(map.is_empty());
        assert_eq!(residual, resp);
    }

    #[test]
    fn extract_deletes_extracted_paths() {
        let resp = v(json!({"status": "ok", "data": {"rows": [1,2,3]}}));
        let (map, residual) = extract(&resp, &["data.rows".to_string()], &[]);
        assert_eq!(map.get("data.rows"), Some(&v(json!([1,2,3]))));
        assert_eq!(residual, v(json!({"status": "ok", "data": {}})));
    }

    #[test]
    fn extract_with_preserve_paths_rebuilds_residual() {
        let resp = v(json!({"status": "ok", "meta": {"page": 1}, "data": {"rows": [1,2]}}));
        let (map, residual) = extract(
            &resp,
            &["data.rows".to_string()],
            &["status".to_string(), "meta".to_string()],
        );
        assert_eq!(map.get("data.rows"), Some(&v(json!([1,2]))));
        assert_eq!(residual, v(json!({"status": "ok", "meta": {"page": 1}})));
    }

    #[test]
    fn extract_root_path_rebuilds_from_preserve_only() {
        let resp = v(json!({"status": "ok", "rows": [1,2,3]}));
        let (map, residual) = extract(&resp, &["".to_string()], &["status".to_string()]);
        assert_eq!(map.get(""), Some(&resp));
        assert_eq!(residual, v(json!({"status": "ok"})));
    }

    #[test]
    fn extract_does_not_mutate_inputs() {
        let resp = v(json!({"data": {"rows": [1,2,3]}}));
        let original = resp.clone();
        let (extracted, residual) = extract(&resp, &["data.rows".to_string()], &[]);
        assert_eq!(resp, original);
        let mut extracted_clone = extracted.get("data.rows").unwrap().clone();
        if let Value::List(l) = &mut extracted_clone {
            l.push(Value::Number(99.0));
        }
        assert_eq!(extracted.get("data.rows"), Some(&v(json!([1,2,3]))));
        assert_ne!(residual, resp);
    }
}
