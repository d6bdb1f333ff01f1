// Helper functions for extracting values from KDL nodes

use std::collections::BTreeMap;
use std::time::Duration;

use kdl::{KdlNode, KdlValue};
use serde_json::Value;

use crate::duration::parse_duration;
use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// Positional arguments of any type.
pub(crate) fn get_args(node: &KdlNode) -> Vec<&KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

pub(crate) fn get_u32_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u32>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };

    value
        .as_integer()
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| ConfigError::invalid(name, format!("expected a non-negative integer, got {value}")))
}

pub(crate) fn get_duration_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<Duration>> {
    let Some(raw) = get_string_prop(node, name) else {
        return Ok(None);
    };

    parse_duration(&raw)
        .map(Some)
        .ok_or_else(|| ConfigError::invalid(name, format!("invalid duration '{raw}'")))
}

pub(crate) fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated properties: passed="a" passed="b"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    if !result.is_empty() {
        return result;
    }

    // Block syntax: passed "a" "b"
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                return get_all_string_args(child);
            }
        }
    }

    Vec::new()
}

pub(crate) fn value_to_json(value: &KdlValue) -> Value {
    match value {
        KdlValue::String(s) => Value::String(s.clone()),
        KdlValue::Integer(n) => i64::try_from(*n)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(n.to_string())),
        KdlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        KdlValue::Bool(b) => Value::Bool(*b),
        KdlValue::Null => Value::Null,
    }
}

/// The value a node stands for inside a map block.
///
/// `key "v"` is a scalar, `key "a" "b"` a list, `key { ... }` a nested map
/// and a bare `key` is null.
fn node_to_json(node: &KdlNode) -> Value {
    let args = get_args(node);

    match args.as_slice() {
        [] => match node.children() {
            Some(_) => Value::Object(get_map_block(node).into_iter().collect()),
            None => Value::Null,
        },
        [single] => value_to_json(single),
        many => Value::Array(many.iter().map(|v| value_to_json(v)).collect()),
    }
}

/// Children of `node` as a key/value map.
pub(crate) fn get_map_block(node: &KdlNode) -> BTreeMap<String, Value> {
    let Some(children) = node.children() else {
        return BTreeMap::new();
    };

    children
        .nodes()
        .iter()
        .map(|child| (child.name().value().to_string(), node_to_json(child)))
        .collect()
}

/// Children of `node` as a map of scalars rendered as strings.
pub(crate) fn get_string_map_block(node: &KdlNode) -> ConfigResult<BTreeMap<String, String>> {
    let Some(children) = node.children() else {
        return Ok(BTreeMap::new());
    };

    let mut map = BTreeMap::new();
    for child in children.nodes() {
        let key = child.name().value().to_string();
        let value = match get_args(child).as_slice() {
            [KdlValue::String(s)] => s.clone(),
            [KdlValue::Integer(n)] => n.to_string(),
            [KdlValue::Float(f)] => f.to_string(),
            [KdlValue::Bool(b)] => b.to_string(),
            _ => {
                return Err(ConfigError::invalid(
                    format!("{}.{key}", node.name().value()),
                    "expected a single value",
                ));
            }
        };
        map.insert(key, value);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdl::KdlDocument;
    use serde_json::json;

    fn node(kdl: &str) -> KdlNode {
        let doc: KdlDocument = kdl.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_map_block_to_json() {
        let source = node(
            r#"
            source {
                uri "https://example.com/repo.git"
                depth 1
                private #true
                branches "main" "release"
                nested {
                    key "value"
                }
                empty
            }
            "#,
        );

        let map = get_map_block(&source);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({
                "uri": "https://example.com/repo.git",
                "depth": 1,
                "private": true,
                "branches": ["main", "release"],
                "nested": { "key": "value" },
                "empty": null,
            })
        );
    }

    #[test]
    fn test_string_map_block_stringifies_scalars() {
        let version = node(r#"version { ref "abc123"; build 42 }"#);

        let map = get_string_map_block(&version).unwrap();
        assert_eq!(map["ref"], "abc123");
        assert_eq!(map["build"], "42");

        let bad = node(r#"version { ref "a" "b" }"#);
        assert!(get_string_map_block(&bad).is_err());
    }

    #[test]
    fn test_string_list_prop_forms() {
        let props = node(r#"get "repo" passed="unit" passed="lint""#);
        assert_eq!(get_string_list_prop(&props, "passed"), vec!["unit", "lint"]);

        let block = node(r#"get "repo" { passed "unit" "lint"; }"#);
        assert_eq!(get_string_list_prop(&block, "passed"), vec!["unit", "lint"]);
    }

    #[test]
    fn test_u32_prop() {
        assert_eq!(get_u32_prop(&node("job \"a\" max-in-flight=3"), "max-in-flight").unwrap(), Some(3));
        assert_eq!(get_u32_prop(&node("job \"a\""), "max-in-flight").unwrap(), None);
        assert!(get_u32_prop(&node("job \"a\" max-in-flight=-1"), "max-in-flight").is_err());
        assert!(get_u32_prop(&node("job \"a\" max-in-flight=\"3\""), "max-in-flight").is_err());
    }
}
