//! Fragment merge logic
//!
//! Folds one parsed fragment into the accumulated configuration tree:
//! - Records: merge by key (recursive)
//! - Sequences: elements with a `name` merge into the existing element of the
//!   same name, everything else is appended
//! - Scalars: override (last wins), including `null`
//!
//! A container arriving where the tree holds a scalar or the other kind of
//! container replaces that node outright before merging, so a node is never
//! half record and half sequence.

use serde_json::{Map, Value};

/// Field used to match sequence elements across fragments.
pub const NAME_KEY: &str = "name";

/// Merge `incoming` into `target`.
///
/// Not idempotent: merging a fragment with unnamed sequence elements twice
/// appends them twice. Each source is meant to be merged once into a fresh
/// tree.
pub fn merge_into(target: &mut Value, incoming: Value) {
    match incoming {
        Value::Object(fields) => {
            let record = ensure_record(target);
            for (key, value) in fields {
                if is_container(&value) {
                    let child = record.entry(key).or_insert(Value::Null);
                    merge_into(child, value);
                } else {
                    record.insert(key, value);
                }
            }
        }
        Value::Array(elements) => {
            let sequence = ensure_sequence(target);
            for element in elements {
                merge_element(sequence, element);
            }
        }
        scalar => *target = scalar,
    }
}

/// Fold a list of trees, first to last, into a fresh empty tree.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    let mut tree = Value::Object(Map::new());
    for layer in layers {
        merge_into(&mut tree, layer);
    }
    tree
}

fn merge_element(sequence: &mut Vec<Value>, element: Value) {
    let existing = element_name(&element).and_then(|name| {
        sequence
            .iter()
            .position(|candidate| element_name(candidate) == Some(name))
    });

    match existing {
        Some(index) => merge_into(&mut sequence[index], element),
        None => sequence.push(element),
    }
}

fn element_name(value: &Value) -> Option<&Value> {
    value.as_object().and_then(|record| record.get(NAME_KEY))
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn ensure_record(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(record) => record,
        _ => unreachable!("node was just made a record"),
    }
}

fn ensure_sequence(node: &mut Value) -> &mut Vec<Value> {
    if !node.is_array() {
        *node = Value::Array(Vec::new());
    }
    match node {
        Value::Array(sequence) => sequence,
        _ => unreachable!("node was just made a sequence"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merged(base: Value, overlay: Value) -> Value {
        let mut tree = base;
        merge_into(&mut tree, overlay);
        tree
    }

    #[test]
    fn test_scalar_override() {
        let result = merged(json!({"timeout": 100}), json!({"timeout": 200}));
        assert_eq!(result["timeout"], 200);
    }

    #[test]
    fn test_null_override() {
        let result = merged(json!({"value": 100}), json!({"value": null}));
        assert!(result["value"].is_null());
    }

    #[test]
    fn test_record_deep_merge() {
        let result = merged(
            json!({"site": {"title": "Old", "locale": "en_GB"}}),
            json!({"site": {"title": "New"}}),
        );

        assert_eq!(result["site"]["title"], "New");
        assert_eq!(result["site"]["locale"], "en_GB");
    }

    #[test]
    fn test_named_element_merges_in_place() {
        let result = merged(
            json!({"routes": [
                {"name": "home", "path": "/", "layout": "wide"},
                {"name": "blog", "path": "/blog"}
            ]}),
            json!({"routes": [{"name": "home", "layout": "narrow"}]}),
        );

        let routes = result["routes"].as_array().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0], json!({"name": "home", "path": "/", "layout": "narrow"}));
        assert_eq!(routes[1]["name"], "blog");
    }

    #[test]
    fn test_new_named_element_appends() {
        let result = merged(
            json!({"routes": [{"name": "home"}]}),
            json!({"routes": [{"name": "about"}]}),
        );

        assert_eq!(result["routes"], json!([{"name": "home"}, {"name": "about"}]));
    }

    #[test]
    fn test_unnamed_elements_append() {
        let result = merged(
            json!({"assets": ["a.css", {"src": "b.js"}]}),
            json!({"assets": ["a.css", {"src": "c.js"}]}),
        );

        assert_eq!(
            result["assets"],
            json!(["a.css", {"src": "b.js"}, "a.css", {"src": "c.js"}])
        );
    }

    #[test]
    fn test_nested_named_elements() {
        let result = merged(
            json!({"menus": [{"name": "main", "items": [{"name": "home", "order": 1}]}]}),
            json!({"menus": [{"name": "main", "items": [
                {"name": "home", "order": 5},
                {"name": "contact", "order": 9}
            ]}]}),
        );

        assert_eq!(
            result["menus"][0]["items"],
            json!([{"name": "home", "order": 5}, {"name": "contact", "order": 9}])
        );
    }

    #[test]
    fn test_name_matching_uses_json_equality() {
        let result = merged(json!([{"name": 1, "a": true}]), json!([{"name": "1", "b": true}]));
        assert_eq!(result.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_container_replaces_scalar() {
        let result = merged(json!({"db": "off"}), json!({"db": {"active": true}}));
        assert_eq!(result["db"], json!({"active": true}));
    }

    #[test]
    fn test_sequence_replaces_record() {
        let result = merged(json!({"list": {"a": 1}}), json!({"list": [1, 2]}));
        assert_eq!(result["list"], json!([1, 2]));
    }

    #[test]
    fn test_scalar_replaces_container() {
        let result = merged(json!({"layout": {"base": {}}}), json!({"layout": false}));
        assert_eq!(result["layout"], json!(false));
    }

    #[test]
    fn test_remerge_duplicates_unnamed_elements() {
        let fragment = json!({"assets": ["a.css"], "routes": [{"name": "home"}]});
        let mut tree = merge_layers(vec![fragment.clone()]);
        merge_into(&mut tree, fragment);

        assert_eq!(tree["assets"], json!(["a.css", "a.css"]));
        assert_eq!(tree["routes"], json!([{"name": "home"}]));
    }

    #[test]
    fn test_merge_layers_last_scalar_wins() {
        let result = merge_layers(vec![
            json!({"site": {"title": "Framework", "locale": "en"}}),
            json!({"site": {"title": "User"}}),
        ]);

        assert_eq!(result, json!({"site": {"title": "User", "locale": "en"}}));
    }

    #[test]
    fn test_merge_layers_empty() {
        assert_eq!(merge_layers(Vec::new()), json!({}));
    }
}
