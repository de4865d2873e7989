/*
 * store.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The variable-set facade.
//!
//! [`VariableStore`] is the convenience surface most callers want: an
//! ordered, case-insensitive name/value mapping with typed getters, filter
//! registration, template evaluation against the whole set, and JSON
//! persistence. The lower-level pieces ([`Template`],
//! [`EvaluationContext`](crate::eval_context::EvaluationContext),
//! [`Binding`]) stay available for callers that need to manage scopes
//! themselves.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use crate::binding::Binding;
use crate::cache::TemplateCache;
use crate::error::{TemplateError, TemplateResult};
use crate::eval_context::EvaluationContext;
use crate::evaluator::{self, EvaluationResult};
use crate::functions::FunctionTable;
use crate::parser::{ParseMode, Template};

/// An ordered set of named variables with an owned filter table and parse
/// cache.
pub struct VariableStore {
    variables: IndexMap<String, Option<String>>,
    functions: FunctionTable,
    cache: TemplateCache,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self {
            variables: IndexMap::new(),
            functions: FunctionTable::default(),
            cache: TemplateCache::default(),
        }
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a variable. Names are case-insensitive; re-assigning keeps
    /// the original key and position.
    pub fn set(&mut self, name: &str, value: &str) {
        self.set_value(name, Some(value.to_string()));
    }

    fn set_value(&mut self, name: &str, value: Option<String>) {
        match self.ci_index(name) {
            Some(i) => {
                if let Some((_, slot)) = self.variables.get_index_mut(i) {
                    *slot = value;
                }
            }
            None => {
                self.variables.insert(name.to_string(), value);
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        if let Some(i) = self.ci_index(name) {
            self.variables.shift_remove_index(i);
        }
    }

    /// The stored value, unevaluated. Entries assigned without a value
    /// read as the empty string.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        let i = self.ci_index(name)?;
        let (_, value) = self.variables.get_index(i)?;
        Some(value.as_deref().unwrap_or(""))
    }

    /// The value with any nested template references expanded against the
    /// full store. `Ok(None)` when the name is not defined. A value that is
    /// not a parseable template reads back literally, matching what the
    /// resolver does when the same value is reached through a reference.
    pub fn get(&self, name: &str) -> TemplateResult<Option<String>> {
        let Some(raw) = self.get_raw(name) else {
            return Ok(None);
        };
        if !raw.contains("#{") {
            return Ok(Some(raw.to_string()));
        }
        match self.evaluate(raw) {
            Ok(text) => Ok(Some(text)),
            Err(TemplateError::Parse(_)) => Ok(Some(raw.to_string())),
            Err(other) => Err(other),
        }
    }

    pub fn get_int(&self, name: &str) -> TemplateResult<Option<i64>> {
        Ok(self.get(name)?.and_then(|v| v.trim().parse().ok()))
    }

    /// Truthiness of the evaluated value; missing variables are `false`.
    pub fn get_flag(&self, name: &str) -> TemplateResult<bool> {
        Ok(self
            .get(name)?
            .is_some_and(|v| evaluator::is_truthy(&v)))
    }

    /// Variable names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Register a custom filter; built-in names win, see
    /// [`FunctionTable::register`].
    pub fn register_function(
        &mut self,
        name: &str,
        f: impl Fn(Option<&str>, &[String]) -> Option<String> + Send + Sync + 'static,
    ) -> bool {
        self.functions.register(name, f)
    }

    /// Render a template (strict parse) against this store.
    pub fn evaluate(&self, source: &str) -> TemplateResult<String> {
        let template = self.cache.template(source, ParseMode::Strict)?;
        let ctx = EvaluationContext::new(self.build_binding(), &self.functions, &self.cache);
        evaluator::render(&template, &ctx)
    }

    /// Render with full diagnostics, in either parse mode.
    pub fn evaluate_with_diagnostics(
        &self,
        source: &str,
        mode: ParseMode,
    ) -> TemplateResult<EvaluationResult> {
        let template = self.cache.template(source, mode)?;
        let ctx = EvaluationContext::new(self.build_binding(), &self.functions, &self.cache);
        evaluator::evaluate(&template, &ctx)
    }

    /// Variable paths a template would read, without evaluating it.
    pub fn referenced_variables(&self, source: &str) -> TemplateResult<Vec<String>> {
        let template = self.cache.template(source, ParseMode::Strict)?;
        Ok(crate::analyzer::referenced_variables(&template))
    }

    /// Merge a JSON object file into the store. Later keys overwrite
    /// earlier ones; `null` values become empty entries; non-string scalars
    /// keep their JSON text.
    pub fn load(&mut self, path: &Path) -> TemplateResult<()> {
        let text = fs::read_to_string(path)?;
        let object: IndexMap<String, Value> = serde_json::from_str(&text)?;
        for (name, value) in object {
            let value = match value {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            };
            self.set_value(&name, value);
        }
        Ok(())
    }

    /// Write the store as an indented JSON object, in insertion order.
    pub fn save(&self, path: &Path) -> TemplateResult<()> {
        let text = serde_json::to_string_pretty(&self.variables)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Drop all memoized parses. Mainly for tests that need deterministic
    /// cache behavior.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn build_binding(&self) -> Binding {
        let mut root = Binding::new();
        for (name, value) in &self.variables {
            let value = value.as_deref().unwrap_or("");
            match self.cache.path(name) {
                Some(path) => root.set_path(&path, value),
                None => root.set(name, value),
            }
        }
        root
    }

    fn ci_index(&self, name: &str) -> Option<usize> {
        self.variables.get_index_of(name).or_else(|| {
            self.variables
                .keys()
                .position(|k| k.eq_ignore_ascii_case(name))
        })
    }
}

/// One-shot convenience: evaluate `source` against flat name/value pairs
/// with the built-in filters.
pub fn substitute<'a>(
    source: &str,
    variables: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> TemplateResult<String> {
    let functions = FunctionTable::default();
    let cache = TemplateCache::default();
    let template = Template::parse(source)?;
    let ctx = EvaluationContext::new(Binding::from_flat(variables), &functions, &cache);
    evaluator::render(&template, &ctx)
}
