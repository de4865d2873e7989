/*
 * eval_context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Evaluation scopes and symbol resolution.
//!
//! An [`EvaluationContext`] owns one binding tree and an optional parent
//! scope. Lookups walk the full symbol path against each scope in turn,
//! innermost first; the first scope that yields a node wins. Iteration
//! bodies and nested-template expansion run in child scopes.
//!
//! Every resolution is cycle-guarded: the set of symbol expressions
//! currently being resolved anywhere in the scope chain is tracked, and
//! re-entering one of them is a hard [`TemplateError::CyclicReference`]
//! rather than an infinite recursion.

use std::cell::RefCell;

use crate::ast::{Index, SymbolExpression, SymbolStep};
use crate::binding::Binding;
use crate::cache::TemplateCache;
use crate::error::{TemplateError, TemplateResult};
use crate::expand::expand_structured;
use crate::functions::FunctionTable;
use crate::parser::ParseMode;

/// One evaluation scope.
pub struct EvaluationContext<'a> {
    binding: Binding,
    parent: Option<&'a EvaluationContext<'a>>,
    functions: &'a FunctionTable,
    cache: &'a TemplateCache,
    guard: RefCell<Vec<SymbolExpression>>,
}

impl<'a> EvaluationContext<'a> {
    /// A root scope over the given binding tree. Item values that turn out
    /// to be templates are parsed through `cache`.
    pub fn new(binding: Binding, functions: &'a FunctionTable, cache: &'a TemplateCache) -> Self {
        Self {
            binding,
            parent: None,
            functions,
            cache,
            guard: RefCell::new(Vec::new()),
        }
    }

    /// A child scope layered over this one. Lookups fall back to `self`
    /// when the child's binding has no match.
    pub fn child(&self, binding: Binding) -> EvaluationContext<'_> {
        EvaluationContext {
            binding,
            parent: Some(self),
            functions: self.functions,
            cache: self.cache,
            guard: RefCell::new(Vec::new()),
        }
    }

    /// The filter registry shared by every scope in this chain.
    pub fn functions(&self) -> &FunctionTable {
        self.functions
    }

    /// Resolve a symbol to its item value. `Ok(None)` means the symbol is
    /// not defined in any scope; an item containing `#{` is itself treated
    /// as a template and evaluated in a child scope before being returned.
    pub fn resolve(&self, expr: &SymbolExpression) -> TemplateResult<Option<String>> {
        self.with_guard(expr, || self.resolve_guarded(expr))
    }

    /// Resolve a symbol to all of its values: indexed entries if it has
    /// any, otherwise elements of a structured-document array, otherwise
    /// the comma-separated pieces of its item.
    pub fn resolve_all(&self, expr: &SymbolExpression) -> TemplateResult<Option<Vec<String>>> {
        self.with_guard(expr, || {
            let Some(expr) = self.materialize(expr)? else {
                return Ok(None);
            };
            let Some(node) = self.find_node(&expr) else {
                return Ok(None);
            };
            if node.has_indexed() {
                return Ok(Some(self.entry_values(&node)?));
            }
            let Some(item) = node.item else {
                return Ok(None);
            };
            if let Some(expanded) = expand_structured(&item) {
                if expanded.has_indexed() {
                    return Ok(Some(self.entry_values(&expanded)?));
                }
            }
            let resolved = self.expand_item(&item)?;
            Ok(Some(
                resolved.split(',').map(|s| s.trim().to_string()).collect(),
            ))
        })
    }

    /// Resolve a symbol to an iterable collection of (index, node) entries,
    /// in insertion order.
    pub fn resolve_collection(
        &self,
        expr: &SymbolExpression,
    ) -> TemplateResult<Option<Vec<(String, Binding)>>> {
        self.with_guard(expr, || {
            let Some(expr) = self.materialize(expr)? else {
                return Ok(None);
            };
            let Some(node) = self.find_node(&expr) else {
                return Ok(None);
            };
            if node.has_indexed() {
                return Ok(Some(clone_entries(&node)));
            }
            let Some(item) = node.item else {
                return Ok(None);
            };
            if let Some(expanded) = expand_structured(&item) {
                if expanded.has_indexed() {
                    return Ok(Some(clone_entries(&expanded)));
                }
            }
            let resolved = self.expand_item(&item)?;
            if resolved.trim().is_empty() {
                return Ok(Some(Vec::new()));
            }
            Ok(Some(
                resolved
                    .split(',')
                    .map(|piece| {
                        let piece = piece.trim().to_string();
                        (piece.clone(), Binding::leaf(piece))
                    })
                    .collect(),
            ))
        })
    }

    fn resolve_guarded(&self, expr: &SymbolExpression) -> TemplateResult<Option<String>> {
        let Some(expr) = self.materialize(expr)? else {
            return Ok(None);
        };
        let Some(node) = self.find_node(&expr) else {
            return Ok(None);
        };
        match node.item {
            Some(item) => Ok(Some(self.expand_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Run `f` with `expr` marked in-flight, failing if it already is
    /// anywhere in the scope chain.
    fn with_guard<T>(
        &self,
        expr: &SymbolExpression,
        f: impl FnOnce() -> TemplateResult<T>,
    ) -> TemplateResult<T> {
        if self.in_flight(expr) {
            return Err(TemplateError::CyclicReference {
                chain: self.cycle_chain(expr),
            });
        }
        self.guard.borrow_mut().push(expr.clone());
        let result = f();
        self.guard.borrow_mut().pop();
        result
    }

    fn in_flight(&self, expr: &SymbolExpression) -> bool {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if c.guard.borrow().iter().any(|e| e == expr) {
                return true;
            }
            ctx = c.parent;
        }
        false
    }

    fn cycle_chain(&self, expr: &SymbolExpression) -> String {
        let mut scopes = vec![self];
        while let Some(parent) = scopes[scopes.len() - 1].parent {
            scopes.push(parent);
        }
        let mut parts: Vec<String> = Vec::new();
        for scope in scopes.iter().rev() {
            parts.extend(scope.guard.borrow().iter().map(ToString::to_string));
        }
        parts.push(expr.to_string());
        parts.join(" -> ")
    }

    /// Replace dynamic indexers with the literal text they resolve to.
    /// `Ok(None)` when any of them is undefined.
    fn materialize(&self, expr: &SymbolExpression) -> TemplateResult<Option<SymbolExpression>> {
        if !expr
            .steps
            .iter()
            .any(|s| matches!(s, SymbolStep::Indexer(Index::Dynamic(_))))
        {
            return Ok(Some(expr.clone()));
        }
        let mut steps = Vec::with_capacity(expr.steps.len());
        for step in &expr.steps {
            match step {
                SymbolStep::Indexer(Index::Dynamic(inner)) => match self.resolve(inner)? {
                    Some(text) => steps.push(SymbolStep::Indexer(Index::Literal(text))),
                    None => return Ok(None),
                },
                other => steps.push(other.clone()),
            }
        }
        Ok(Some(SymbolExpression::new(steps)))
    }

    /// Walk the full path against each scope in the chain, innermost first.
    fn find_node(&self, expr: &SymbolExpression) -> Option<Binding> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let Some(found) = walk(&c.binding, &expr.steps) {
                return Some(found);
            }
            ctx = c.parent;
        }
        None
    }

    /// Nested-template expansion of a resolved item. Items that are not
    /// parseable templates are returned verbatim; parse outcomes, failures
    /// included, are memoized in the shared cache.
    fn expand_item(&self, item: &str) -> TemplateResult<String> {
        if !item.contains("#{") {
            return Ok(item.to_string());
        }
        let Ok(template) = self.cache.template(item, ParseMode::Strict) else {
            return Ok(item.to_string());
        };
        if !template.has_substitutions() {
            return Ok(item.to_string());
        }
        let scope = self.child(Binding::new());
        crate::evaluator::render(&template, &scope)
    }

    fn entry_values(&self, node: &Binding) -> TemplateResult<Vec<String>> {
        let mut values = Vec::new();
        for (key, entry) in node.indexed_entries() {
            let raw = entry.item.clone().unwrap_or_else(|| key.to_string());
            values.push(self.expand_item(&raw)?);
        }
        Ok(values)
    }
}

fn clone_entries(node: &Binding) -> Vec<(String, Binding)> {
    node.indexed_entries()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

enum Node<'b> {
    Borrowed(&'b Binding),
    Owned(Binding),
}

impl Node<'_> {
    fn get(&self) -> &Binding {
        match self {
            Node::Borrowed(b) => b,
            Node::Owned(b) => b,
        }
    }
}

/// Walk `steps` down from `root`, expanding a structured-document leaf when
/// a step has nowhere else to go.
fn walk(root: &Binding, steps: &[SymbolStep]) -> Option<Binding> {
    let mut current = Node::Borrowed(root);
    for step in steps {
        let next = match lookup_step(current.get(), step).cloned() {
            Some(node) => node,
            None => {
                let item = current.get().item.clone()?;
                let expanded = expand_structured(&item)?;
                lookup_step(&expanded, step).cloned()?
            }
        };
        current = Node::Owned(next);
    }
    Some(match current {
        Node::Borrowed(b) => b.clone(),
        Node::Owned(b) => b,
    })
}

fn lookup_step<'b>(node: &'b Binding, step: &SymbolStep) -> Option<&'b Binding> {
    match step {
        SymbolStep::Identifier(name) => node.child(name),
        SymbolStep::Indexer(Index::Literal(key)) => node.indexed(key),
        SymbolStep::Indexer(Index::Wildcard) => node.first_indexed(),
        SymbolStep::Indexer(Index::Empty) => node.indexed(""),
        // Dynamic indexers are materialized before the walk.
        SymbolStep::Indexer(Index::Dynamic(_)) => None,
    }
}
