/*
 * expand.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Structured-data expansion.
//!
//! A variable whose value is a JSON or YAML document can be addressed
//! *through*: `#{Config:Ports[0]}` descends into the parsed document. The
//! expansion is lazy; it happens only when a path walk reaches a leaf and
//! still has steps left, and the expanded subtree is discarded after the
//! walk.

use serde_json::Value;

use crate::binding::Binding;

/// Try to expand a raw item value into a binding subtree. JSON is tried
/// first, then YAML. Only objects and arrays expand; scalars (which any
/// text would parse as in YAML) do not.
pub fn expand_structured(text: &str) -> Option<Binding> {
    let value = parse_document(text)?;
    match value {
        Value::Object(_) | Value::Array(_) => Some(to_binding(&value)),
        _ => None,
    }
}

fn parse_document(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    serde_yaml::from_str::<Value>(text).ok()
}

/// Convert a parsed document into a binding subtree.
///
/// Object members populate both the dotted-child and the indexed maps, so
/// `#{Doc.Key}`, `#{Doc[Key]}`, and `#{each m in Doc}` all work. Array
/// elements become indexed entries `0..n`. Interior nodes keep the compact
/// JSON serialization of their subtree as their item, so substituting a
/// non-leaf path echoes the document fragment.
fn to_binding(value: &Value) -> Binding {
    match value {
        Value::Null => Binding::leaf(""),
        Value::Bool(b) => Binding::leaf(b.to_string()),
        Value::Number(n) => Binding::leaf(n.to_string()),
        Value::String(s) => Binding::leaf(s.as_str()),
        Value::Array(items) => {
            let mut node = Binding::leaf(value.to_string());
            for (i, item) in items.iter().enumerate() {
                *node.indexed_mut(&i.to_string()) = to_binding(item);
            }
            node
        }
        Value::Object(members) => {
            let mut node = Binding::leaf(value.to_string());
            for (key, member) in members {
                let subtree = to_binding(member);
                *node.child_mut(key) = subtree.clone();
                *node.indexed_mut(key) = subtree;
            }
            node
        }
    }
}
