//! MI tree model and decoder.
//!
//! OpenSIPS encodes its MI trees in JSON using several interchangeable
//! conventions. The same logical node can arrive as:
//!
//! - an explicit node: `{"name": "...", "value": "...", "attributes": {...}, "children": [...]}`
//! - a singleton-wrapped array: `{"Processes": [ {...}, {...} ]}`
//! - an implicit map: `{"core:rcv_requests": "42", "core:rcv_replies": "17"}`
//! - a bare list of any of the above
//!
//! [`decode`] resolves all of them into a single canonical [`Node`] tree.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A node of an MI tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    name: Option<String>,
    value: Option<String>,
    attributes: BTreeMap<String, String>,
    children: Vec<Node>,
    child_values: BTreeMap<String, String>,
}

impl Node {
    /// Create a `(name, value)` leaf.
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Node name, when the source labeled it.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Scalar payload of the node.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Per-node metadata, ordered by attribute name.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Look up a single attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Ordered child nodes.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Values of named children, keyed by child name.
    ///
    /// When several children share a name, the last one wins.
    pub fn child_values(&self) -> &BTreeMap<String, String> {
        &self.child_values
    }

    /// Value of the named child.
    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.child_values.get(name).map(String::as_str)
    }

    /// Whether the node carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.value.is_none()
            && self.attributes.is_empty()
            && self.children.is_empty()
    }

    fn push_child(&mut self, child: Node) {
        if let (Some(name), Some(value)) = (child.name(), child.value()) {
            if !name.is_empty() {
                self.child_values.insert(name.to_string(), value.to_string());
            }
        }
        self.children.push(child);
    }

    fn adopt_children(&mut self, other: Node) {
        self.children = other.children;
        self.child_values = other.child_values;
    }
}

/// Decode a JSON value returned by `mi_json` into a [`Node`] tree.
///
/// Maps and lists are accepted at every level where a node is expected;
/// scalars there are rejected with [`DecodeError::UnsupportedType`].
pub fn decode(value: &Value) -> Result<Node, DecodeError> {
    decode_node(value, "root")
}

fn decode_node(value: &Value, context: &str) -> Result<Node, DecodeError> {
    match value {
        Value::Object(map) => decode_map(map),
        Value::Array(items) => decode_list(items),
        other => Err(unsupported(other, context)),
    }
}

fn decode_map(map: &Map<String, Value>) -> Result<Node, DecodeError> {
    if let Some(node) = decode_explicit(map)? {
        return Ok(node);
    }

    if map.len() == 1 {
        if let Some((name, Value::Array(items))) = map.iter().next() {
            let mut node = decode_list(items)?;
            node.name = Some(name.clone());
            return Ok(node);
        }
    }

    decode_implicit(map)
}

/// Decode a map using the explicit `name`/`value`/`attributes`/`children`
/// keys. Returns `None` when none of them is present with a usable type.
fn decode_explicit(map: &Map<String, Value>) -> Result<Option<Node>, DecodeError> {
    let mut node = Node::default();
    let mut explicit = false;

    if let Some(Value::String(name)) = map.get("name") {
        node.name = Some(name.clone());
        explicit = true;
    }

    if let Some(Value::String(value)) = map.get("value") {
        node.value = Some(value.clone());
        explicit = true;
    }

    if let Some(Value::Object(attributes)) = map.get("attributes") {
        node.attributes = attributes
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        explicit = true;
    }

    match map.get("children") {
        Some(Value::Array(items)) => {
            node.adopt_children(decode_list(items)?);
            explicit = true;
        }
        Some(Value::Object(entries)) => {
            node.adopt_children(decode_implicit(entries)?);
            explicit = true;
        }
        _ => {}
    }

    Ok(explicit.then_some(node))
}

fn decode_implicit(map: &Map<String, Value>) -> Result<Node, DecodeError> {
    let mut node = Node::default();

    for (key, value) in map {
        let child = match value {
            Value::String(s) => Node::leaf(key.clone(), s.clone()),
            Value::Object(inner) => {
                let mut child = decode_map(inner)?;
                if child.name.is_none() {
                    child.name = Some(key.clone());
                }
                child
            }
            Value::Array(items) => {
                let mut child = decode_list(items)?;
                child.name = Some(key.clone());
                child
            }
            other => return Err(unsupported(other, &format!("value of '{}'", key))),
        };
        node.push_child(child);
    }

    Ok(node)
}

fn decode_list(items: &[Value]) -> Result<Node, DecodeError> {
    let mut node = Node::default();
    node.children.reserve(items.len());

    for (i, item) in items.iter().enumerate() {
        let child = decode_node(item, &format!("list element {}", i))?;
        node.push_child(child);
    }

    Ok(node)
}

fn unsupported(value: &Value, context: &str) -> DecodeError {
    DecodeError::UnsupportedType {
        found: shape(value),
        context: context.to_string(),
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
