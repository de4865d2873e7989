/*
 * binding.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The hierarchical variable tree.
//!
//! A flat variable dictionary (`"Octopus.Action[Package A].Name" => "..."`)
//! is parsed into a tree of [`Binding`] nodes. Each node distinguishes
//! dotted children from bracket-indexed entries, holds an optional item
//! value, and preserves insertion order. Lookups are case-insensitive but
//! keys keep the case they were first inserted with.

use indexmap::IndexMap;

use crate::ast::{Index, SymbolExpression, SymbolStep};
use crate::parser::parse_path;

/// One node of the variable tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    /// The value stored at this exact path, if any.
    pub item: Option<String>,
    children: IndexMap<String, Binding>,
    indexable: IndexMap<String, Binding>,
}

fn ci_find(map: &IndexMap<String, Binding>, name: &str) -> Option<usize> {
    map.get_index_of(name)
        .or_else(|| map.keys().position(|k| k.eq_ignore_ascii_case(name)))
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf holding a value.
    pub fn leaf(item: impl Into<String>) -> Self {
        Self {
            item: Some(item.into()),
            ..Self::default()
        }
    }

    /// Build a tree from flat name/value pairs. Names that do not parse as
    /// paths become single-identifier children under their full name, so no
    /// assignment is ever dropped.
    pub fn from_flat<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut root = Binding::new();
        for (name, value) in pairs {
            root.set(name, value);
        }
        root
    }

    /// Assign `value` at the path named by `name`, creating intermediate
    /// nodes as needed.
    pub fn set(&mut self, name: &str, value: &str) {
        match parse_path(name) {
            Some(path) => self.set_path(&path, value),
            None => {
                self.child_mut(name).item = Some(value.to_string());
            }
        }
    }

    /// Assign `value` at an already-parsed path.
    pub fn set_path(&mut self, path: &SymbolExpression, value: &str) {
        let mut node = self;
        for step in &path.steps {
            node = match step {
                SymbolStep::Identifier(name) => node.child_mut(name),
                SymbolStep::Indexer(index) => {
                    // Non-literal indexers are stored under their source
                    // form; lookups through them resolve at evaluation time.
                    let key = match index {
                        Index::Literal(text) => text.clone(),
                        other => other.to_string(),
                    };
                    node.indexed_mut(&key)
                }
            };
        }
        node.item = Some(value.to_string());
    }

    /// Dotted child lookup, case-insensitive.
    pub fn child(&self, name: &str) -> Option<&Binding> {
        ci_find(&self.children, name).map(|i| &self.children[i])
    }

    /// Dotted child, created empty if absent.
    pub fn child_mut(&mut self, name: &str) -> &mut Binding {
        let i = match ci_find(&self.children, name) {
            Some(i) => i,
            None => {
                self.children.insert(name.to_string(), Binding::new());
                self.children.len() - 1
            }
        };
        &mut self.children[i]
    }

    /// Indexed entry lookup, case-insensitive.
    pub fn indexed(&self, key: &str) -> Option<&Binding> {
        ci_find(&self.indexable, key).map(|i| &self.indexable[i])
    }

    /// Indexed entry, created if absent. A new entry's item defaults to the
    /// index text itself, so `#{each a in Xs}#{a}#{/each}` yields the index
    /// names when no explicit item was assigned.
    pub fn indexed_mut(&mut self, key: &str) -> &mut Binding {
        let i = match ci_find(&self.indexable, key) {
            Some(i) => i,
            None => {
                self.indexable.insert(key.to_string(), Binding::leaf(key));
                self.indexable.len() - 1
            }
        };
        &mut self.indexable[i]
    }

    /// First indexed entry in insertion order; this is what `[*]` selects.
    pub fn first_indexed(&self) -> Option<&Binding> {
        self.indexable.values().next()
    }

    /// Indexed entries in insertion order.
    pub fn indexed_entries(&self) -> impl DoubleEndedIterator<Item = (&str, &Binding)> {
        self.indexable.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Dotted children in insertion order.
    pub fn child_entries(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_indexed(&self) -> bool {
        !self.indexable.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.item.is_none() && self.children.is_empty() && self.indexable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_and_get_simple() {
        let mut root = Binding::new();
        root.set("Foo", "bar");
        assert_eq!(root.child("Foo").and_then(|b| b.item.as_deref()), Some("bar"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut root = Binding::new();
        root.set("Foo.Bar", "1");
        let bar = root
            .child("FOO")
            .and_then(|b| b.child("bar"))
            .and_then(|b| b.item.as_deref());
        assert_eq!(bar, Some("1"));
    }

    #[test]
    fn test_assignments_merge_case_insensitively() {
        let mut root = Binding::new();
        root.set("Foo.A", "1");
        root.set("FOO.B", "2");
        let foo = root.child("foo").expect("Foo");
        assert_eq!(foo.child("A").and_then(|b| b.item.as_deref()), Some("1"));
        assert_eq!(foo.child("B").and_then(|b| b.item.as_deref()), Some("2"));
    }

    #[test]
    fn test_indexed_paths() {
        let mut root = Binding::new();
        root.set("Octopus.Action[Package A].Name", "A");
        root.set("Octopus.Action[Package B].Name", "B");
        let action = root
            .child("Octopus")
            .and_then(|b| b.child("Action"))
            .expect("Octopus.Action");
        assert!(action.has_indexed());
        let a = action.indexed("package a").expect("Package A");
        assert_eq!(a.item.as_deref(), Some("Package A"));
        assert_eq!(a.child("Name").and_then(|b| b.item.as_deref()), Some("A"));
    }

    #[test]
    fn test_indexed_entries_preserve_insertion_order_and_case() {
        let mut root = Binding::new();
        root.set("Xs[B]", "2");
        root.set("Xs[a]", "1");
        root.set("Xs[C]", "3");
        let xs = root.child("Xs").expect("Xs");
        let keys: Vec<&str> = xs.indexed_entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["B", "a", "C"]);
        assert_eq!(xs.first_indexed().and_then(|b| b.item.as_deref()), Some("B"));
    }

    #[test]
    fn test_explicit_item_beats_index_default() {
        let mut root = Binding::new();
        root.set("Xs[a]", "value");
        let a = root.child("Xs").and_then(|b| b.indexed("a")).expect("Xs[a]");
        assert_eq!(a.item.as_deref(), Some("value"));
    }

    #[test]
    fn test_unparsable_name_becomes_literal_child() {
        let mut root = Binding::new();
        root.set("odd|name", "v");
        assert_eq!(
            root.child("odd|name").and_then(|b| b.item.as_deref()),
            Some("v")
        );
    }

    #[test]
    fn test_from_flat() {
        let root = Binding::from_flat([("A", "1"), ("B.C", "2")]);
        assert_eq!(root.child("A").and_then(|b| b.item.as_deref()), Some("1"));
        assert_eq!(
            root.child("B").and_then(|b| b.child("C")).and_then(|b| b.item.as_deref()),
            Some("2")
        );
    }
}
