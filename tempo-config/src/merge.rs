//! JSON deep merge and dotted-path lookup.

use serde_json::Value;

/// Merges `patch` into `base`.
///
/// Objects merge key by key, recursively. Any other patch value (including
/// arrays and `null`) replaces the base value outright.
pub fn merge_patch(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_patch(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Resolves a dotted path such as `"retry.attempts"` or `"hosts.0"`.
///
/// Numeric segments index into arrays. An empty path returns `value` itself.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_nested_objects_merge() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        merge_patch(&mut base, &json!({"nested": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": 1, "nested": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_scalars_and_arrays_replace() {
        let mut base = json!({"list": [1, 2, 3], "n": {"deep": true}});
        merge_patch(&mut base, &json!({"list": [9], "n": 5}));
        assert_eq!(base, json!({"list": [9], "n": 5}));
    }

    #[test]
    fn test_lookup() {
        let value = json!({"retry": {"attempts": 3}, "hosts": ["a", "b"]});
        assert_eq!(lookup(&value, "retry.attempts"), Some(&json!(3)));
        assert_eq!(lookup(&value, "hosts.1"), Some(&json!("b")));
        assert_eq!(lookup(&value, "hosts.7"), None);
        assert_eq!(lookup(&value, "retry.missing"), None);
        assert_eq!(lookup(&value, "retry.attempts.deeper"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }
}
