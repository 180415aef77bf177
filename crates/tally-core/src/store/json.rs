//! JSON value helpers shared by the store and the assembler.
//!
//! Merge semantics follow the cache: objects merge recursively, a `null`
//! leaf deletes the key, anything else (arrays included) replaces.

use serde_json::{Map, Value};

/// Fields that only describe in-flight state.
pub const TRANSIENT_FIELDS: [&str; 3] = ["pendingAction", "pendingFields", "errors"];

/// Apply `patch` onto `target` in place.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                if value.is_null() {
                    dst.remove(key);
                    continue;
                }
                match dst.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        dst.insert(key.clone(), strip_nulls(value));
                    }
                }
            }
        }
        (target, patch) => *target = strip_nulls(patch),
    }
}

/// Copy of `value` with every `null` object field removed, recursively.
#[must_use]
pub fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// The pre-mutation partial snapshot of exactly the sub-fields `patch` touches.
///
/// Merging the result back over the patched value restores `before`: fields
/// the patch set to a value are restored to their prior value (or deleted
/// with `null` if they did not exist), nested objects recurse.
#[must_use]
pub fn snapshot_for_patch(before: &Value, patch: &Value) -> Value {
    match (before, patch) {
        (Value::Object(prior), Value::Object(fields)) => {
            let mut out = Map::new();
            for (key, patched) in fields {
                let restored = match prior.get(key) {
                    None => Value::Null,
                    Some(old) if old.is_object() && patched.is_object() => {
                        snapshot_for_patch(old, patched)
                    }
                    Some(old) => old.clone(),
                };
                out.insert(key.clone(), restored);
            }
            Value::Object(out)
        }
        (prior, _) => prior.clone(),
    }
}

/// Narrow patch turning `before` into `after`, or `None` if they are equal.
///
/// Only changed leaves are included; removed fields become `null`.
#[must_use]
pub fn diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut out = Map::new();
            for (key, value) in new {
                match old.get(key) {
                    Some(prior) if prior == value => {}
                    Some(prior) if prior.is_object() && value.is_object() => {
                        if let Some(nested) = diff(prior, value) {
                            out.insert(key.clone(), nested);
                        }
                    }
                    _ => {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    out.insert(key.clone(), Value::Null);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}

/// Merge patch that clears the transient fields a patch introduced.
///
/// `pendingFields` is cleared field by field so that unrelated pending
/// fields owned by other in-flight mutations survive. Nested objects are
/// searched too, which covers per-entry state inside action maps.
#[must_use]
pub fn transient_clear(patch: &Value) -> Option<Value> {
    let Value::Object(fields) = patch else {
        return None;
    };
    let mut out = Map::new();
    for (key, value) in fields {
        if key == "pendingFields" {
            if let Value::Object(pending) = value {
                let cleared: Map<String, Value> = pending
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| (k.clone(), Value::Null))
                    .collect();
                if !cleared.is_empty() {
                    out.insert(key.clone(), Value::Object(cleared));
                }
            }
        } else if TRANSIENT_FIELDS.contains(&key.as_str()) {
            if !value.is_null() {
                out.insert(key.clone(), Value::Null);
            }
        } else if let Some(nested) = transient_clear(value) {
            out.insert(key.clone(), nested);
        }
    }
    (!out.is_empty()).then_some(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_deep_and_null_deletes() {
        let mut target = json!({"a": 1, "nested": {"x": 1, "y": 2}, "gone": true});
        deep_merge(&mut target, &json!({"nested": {"y": null, "z": 3}, "gone": null, "b": [1, null]}));
        assert_eq!(target, json!({"a": 1, "nested": {"x": 1, "z": 3}, "b": [1, null]}));
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut target = json!({"list": [1, 2, 3]});
        deep_merge(&mut target, &json!({"list": [4]}));
        assert_eq!(target, json!({"list": [4]}));
    }

    #[test]
    fn snapshot_restores_exactly_the_patched_fields() {
        let before = json!({"total": -100, "name": "R", "pendingFields": {"total": "update"}});
        let patch = json!({"total": -200, "pendingFields": {"currency": "update"}, "fresh": 1});
        let snap = snapshot_for_patch(&before, &patch);
        assert_eq!(
            snap,
            json!({"total": -100, "pendingFields": {"currency": null}, "fresh": null})
        );

        let mut value = before.clone();
        deep_merge(&mut value, &patch);
        deep_merge(&mut value, &snap);
        assert_eq!(value, before);
    }

    #[test]
    fn diff_is_narrow() {
        let before = json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3});
        let after = json!({"a": 1, "b": {"x": 1, "y": 5}, "d": 4});
        assert_eq!(
            diff(&before, &after),
            Some(json!({"b": {"y": 5}, "d": 4, "c": null}))
        );
        assert_eq!(diff(&before, &before), None);
    }

    #[test]
    fn transient_clear_targets_pending_state_only() {
        let patch = json!({
            "total": -10,
            "pendingFields": {"total": "update"},
            "a1": {"pendingAction": "add", "created": "x"},
        });
        assert_eq!(
            transient_clear(&patch),
            Some(json!({"pendingFields": {"total": null}, "a1": {"pendingAction": null}}))
        );
        assert_eq!(transient_clear(&json!({"total": -10})), None);
    }
}
