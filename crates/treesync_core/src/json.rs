//! JSON interchange for nodes.
//!
//! The JSON form uses three meta keys:
//! - `.priority` holds the priority of a leaf or container
//! - `.value` holds the value of a leaf that also carries a priority
//! - `.sv` marks a server value; `{".sv": "timestamp"}` is the timestamp placeholder
//!
//! Arrays import as containers keyed by index.

use crate::error::{CoreError, CoreResult};
use crate::node::{Leaf, Node, Priority};
use crate::path::{ChildKey, Path};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

const PRIORITY_KEY: &str = ".priority";
const VALUE_KEY: &str = ".value";
const SERVER_VALUE_KEY: &str = ".sv";
const TIMESTAMP: &str = "timestamp";

impl Node {
    /// Builds a node from JSON.
    pub fn from_json(value: &Value) -> CoreResult<Node> {
        import(value, &Path::root())
    }

    /// Exports this node to JSON, including priorities and placeholders.
    pub fn to_json(&self) -> Value {
        export(self, true)
    }

    /// Exports only the values, dropping priorities.
    pub fn to_plain_json(&self) -> Value {
        export(self, false)
    }

    /// Returns a hex-encoded SHA-256 of the canonical JSON export.
    ///
    /// The empty node hashes to the empty string.
    pub fn hash(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let canonical = self.to_json().to_string();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// Parses a priority from JSON.
pub fn priority_from_json(value: &Value, at: &Path) -> CoreResult<Priority> {
    match value {
        Value::Null => Ok(Priority::None),
        Value::Number(n) => n
            .as_f64()
            .map(Priority::Number)
            .ok_or_else(|| CoreError::invalid_value(at.to_string(), "priority out of range")),
        Value::String(s) => Ok(Priority::string(s)),
        _ => Err(CoreError::invalid_value(
            at.to_string(),
            "priority must be a number, a string or null",
        )),
    }
}

/// Exports a priority to JSON.
pub fn priority_to_json(priority: &Priority) -> Value {
    match priority {
        Priority::None => Value::Null,
        Priority::Number(n) => number(*n),
        Priority::String(s) => Value::String(s.to_string()),
    }
}

fn import(value: &Value, at: &Path) -> CoreResult<Node> {
    match value {
        Value::Null => Ok(Node::empty()),
        Value::Bool(b) => Ok(Node::from(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(Node::from)
            .ok_or_else(|| CoreError::invalid_value(at.to_string(), "number out of range")),
        Value::String(s) => Ok(Node::from(s.as_str())),
        Value::Array(items) => {
            let mut node = Node::empty();
            for (index, item) in items.iter().enumerate() {
                let key = ChildKey::new(index.to_string())?;
                let child = import(item, &at.child(&key))?;
                node = node.with_child(&key, child);
            }
            Ok(node)
        }
        Value::Object(map) => import_object(map, at),
    }
}

fn import_object(map: &Map<String, Value>, at: &Path) -> CoreResult<Node> {
    if let Some(server_value) = map.get(SERVER_VALUE_KEY) {
        return match server_value {
            Value::String(s) if s == TIMESTAMP => Ok(Node::server_timestamp()),
            other => Err(CoreError::invalid_value(
                at.to_string(),
                format!("unsupported server value {other}"),
            )),
        };
    }

    let priority = match map.get(PRIORITY_KEY) {
        Some(p) => priority_from_json(p, at)?,
        None => Priority::None,
    };

    if let Some(inner) = map.get(VALUE_KEY) {
        if map.keys().any(|k| k != VALUE_KEY && k != PRIORITY_KEY) {
            return Err(CoreError::invalid_value(
                at.to_string(),
                "\".value\" cannot be combined with child keys",
            ));
        }
        return Ok(import(inner, at)?.with_priority(priority));
    }

    let mut node = Node::empty();
    for (raw_key, raw_child) in map {
        if raw_key == PRIORITY_KEY {
            continue;
        }
        let key = ChildKey::new(raw_key)?;
        let child = import(raw_child, &at.child(&key))?;
        node = node.with_child(&key, child);
    }
    Ok(node.with_priority(priority))
}

fn export(node: &Node, with_priority: bool) -> Value {
    if node.is_empty() {
        return Value::Null;
    }
    let priority = node.priority();
    if let Some(leaf) = node.as_leaf() {
        let value = leaf_to_json(leaf);
        if !with_priority || priority.is_none() {
            return value;
        }
        let mut map = Map::new();
        map.insert(VALUE_KEY.to_string(), value);
        map.insert(PRIORITY_KEY.to_string(), priority_to_json(priority));
        return Value::Object(map);
    }
    let mut map = Map::new();
    for (key, child) in node.children() {
        map.insert(key.as_str().to_string(), export(child, with_priority));
    }
    if with_priority && !priority.is_none() {
        map.insert(PRIORITY_KEY.to_string(), priority_to_json(priority));
    }
    Value::Object(map)
}

fn leaf_to_json(leaf: &Leaf) -> Value {
    match leaf {
        Leaf::Bool(b) => Value::Bool(*b),
        Leaf::Number(n) => number(*n),
        Leaf::String(s) => Value::String(s.to_string()),
        Leaf::ServerTimestamp => {
            let mut map = Map::new();
            map.insert(SERVER_VALUE_KEY.to_string(), Value::String(TIMESTAMP.into()));
            Value::Object(map)
        }
    }
}

fn number(n: f64) -> Value {
    // Whole numbers inside the exactly representable range export as integers.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn imports_nested_objects() {
        let node = Node::from_json(&json!({"a": {"b": 1, "c": "x"}, "d": true})).unwrap();
        assert_eq!(node.get(&path("/a/b")), Node::from(1));
        assert_eq!(node.get(&path("/a/c")), Node::from("x"));
        assert_eq!(node.get(&path("/d")), Node::from(true));
    }

    #[test]
    fn empty_objects_and_nulls_vanish() {
        let node = Node::from_json(&json!({"a": {}, "b": null, "c": {"d": {}}})).unwrap();
        assert!(node.is_empty());
    }

    #[test]
    fn arrays_become_indexed_children() {
        let node = Node::from_json(&json!(["x", "y"])).unwrap();
        assert_eq!(node.get(&path("/0")), Node::from("x"));
        assert_eq!(node.get(&path("/1")), Node::from("y"));
    }

    #[test]
    fn priorities_and_values() {
        let node = Node::from_json(&json!({
            "a": {".value": 5, ".priority": 2},
            "b": {"x": 1, ".priority": "p"}
        }))
        .unwrap();
        assert_eq!(node.get(&path("/a")).priority(), &Priority::Number(2.0));
        assert_eq!(node.get(&path("/a")).as_f64(), Some(5.0));
        assert_eq!(node.get(&path("/b")).priority(), &Priority::string("p"));

        assert_eq!(
            node.to_json(),
            json!({"a": {".value": 5, ".priority": 2}, "b": {"x": 1, ".priority": "p"}})
        );
        assert_eq!(node.to_plain_json(), json!({"a": 5, "b": {"x": 1}}));
    }

    #[test]
    fn server_timestamp_placeholder() {
        let node = Node::from_json(&json!({"at": {".sv": "timestamp"}})).unwrap();
        assert_eq!(node.get(&path("/at")), Node::server_timestamp());
        assert_eq!(node.to_json(), json!({"at": {".sv": "timestamp"}}));
        assert!(Node::from_json(&json!({".sv": "increment"})).is_err());
    }

    #[test]
    fn rejects_invalid_keys() {
        let err = Node::from_json(&json!({"bad.key": 1})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPathSegment { .. }));
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = Node::from_json(&json!({"x": 1, "y": 2})).unwrap();
        let b = Node::from_json(&json!({"y": 2, "x": 1})).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
        assert_ne!(a.hash(), Node::from(1).hash());
        assert_eq!(Node::empty().hash(), "");
    }
}
