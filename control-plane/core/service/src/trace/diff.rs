// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Structural diff over message trees.
//!
//! Scalars compare by value. Objects diff per key: added keys appear as
//! `+key`, removed keys as `-key`, changed keys recurse. Arrays are treated
//! as index-keyed maps, so insertions and removals show up as `+2`/`-2`.
//! Equal trees produce no diff at all.

use serde_json::{Map, Value};

/// Difference between two trees, or None when they are equal.
pub fn diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_maps(old, new),
        (Value::Array(old), Value::Array(new)) => {
            diff_maps(&array_to_map(old), &array_to_map(new))
        }
        _ => {
            if old == new {
                None
            } else {
                Some(new.clone())
            }
        }
    }
}

fn array_to_map(values: &[Value]) -> Map<String, Value> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (i.to_string(), v.clone()))
        .collect()
}

fn diff_maps(old: &Map<String, Value>, new: &Map<String, Value>) -> Option<Value> {
    let mut out = Map::new();

    for (key, new_value) in new {
        match old.get(key) {
            None => {
                out.insert(format!("+{}", key), new_value.clone());
            }
            Some(old_value) => {
                if let Some(changed) = diff(old_value, new_value) {
                    out.insert(key.clone(), changed);
                }
            }
        }
    }

    for (key, old_value) in old {
        if !new.contains_key(key) {
            out.insert(format!("-{}", key), old_value.clone());
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_trees_produce_no_diff() {
        let m = json!({
            "id": "1",
            "labels": {"a": "b"},
            "segments": [{"name": "nsc"}, {"name": "nsmgr"}],
        });
        assert_eq!(diff(&m, &m), None);
    }

    #[test]
    fn test_scalar_change_reports_new_value() {
        let old = json!({"network_service": "svc-a"});
        let new = json!({"network_service": "svc-b"});
        assert_eq!(diff(&old, &new), Some(json!({"network_service": "svc-b"})));
    }

    #[test]
    fn test_added_and_removed_keys_are_marked() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"a": 1, "c": 3});
        assert_eq!(diff(&old, &new), Some(json!({"+c": 3, "-b": 2})));
    }

    #[test]
    fn test_arrays_diff_per_index() {
        let old = json!({"segments": [{"name": "nsc"}]});
        let new = json!({"segments": [{"name": "nsc"}, {"name": "nsmgr"}]});
        assert_eq!(
            diff(&old, &new),
            Some(json!({"segments": {"+1": {"name": "nsmgr"}}}))
        );

        let shrunk = json!({"segments": [{"name": "nsc"}]});
        assert_eq!(
            diff(&new, &shrunk),
            Some(json!({"segments": {"-1": {"name": "nsmgr"}}}))
        );
    }

    #[test]
    fn test_nested_messages_recurse() {
        let old = json!({"mechanism": {"cls": "LOCAL", "type": "KERNEL"}});
        let new = json!({"mechanism": {"cls": "LOCAL", "type": "VXLAN"}});
        assert_eq!(
            diff(&old, &new),
            Some(json!({"mechanism": {"type": "VXLAN"}}))
        );
    }

    #[test]
    fn test_type_change_reports_new_value() {
        let old = json!({"field": {"nested": true}});
        let new = json!({"field": "flat"});
        assert_eq!(diff(&old, &new), Some(json!({"field": "flat"})));
    }
}
