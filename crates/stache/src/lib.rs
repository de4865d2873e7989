/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Hash-delimited string templating with hierarchical variable
//! substitution.
//!
//! Templates embed `#{…}` directives in plain text: substitutions with
//! filter chains (`#{Name | ToUpper}`), conditionals
//! (`#{if Flag}…#{else}…#{/if}`), iteration
//! (`#{each x in Items}…#{/each}`), and arithmetic (`#{calc A + 1}`).
//! Variables come from a flat name/value set whose dotted and bracketed
//! names form a tree; values may themselves be templates or JSON/YAML
//! documents, both expanded lazily at resolution time with cycle
//! detection.
//!
//! Unresolvable references are not errors: the raw token is echoed into
//! the output and reported through
//! [`EvaluationResult::missing_tokens`], so rendering can be retried once
//! more variables are known.
//!
//! The simplest entry point is [`VariableStore`]:
//!
//! ```
//! use stache::VariableStore;
//!
//! let mut vars = VariableStore::new();
//! vars.set("Name", "World");
//! assert_eq!(vars.evaluate("Hello #{Name}!").unwrap(), "Hello World!");
//! ```
//!
//! Lower-level pieces are exposed for callers that manage parsing and
//! scoping themselves: [`Template`] (parsed, span-preserving token
//! stream), [`Binding`] (the variable tree), [`EvaluationContext`]
//! (scoped resolution), and [`referenced_variables`] (static dependency
//! analysis).

pub mod analyzer;
pub mod ast;
pub mod binding;
pub mod cache;
pub mod error;
pub mod eval_context;
pub mod evaluator;
pub mod expand;
pub mod functions;
pub mod parser;
pub mod store;

pub use analyzer::referenced_variables;
pub use binding::Binding;
pub use cache::TemplateCache;
pub use error::{ParseDiagnostic, TemplateError, TemplateResult};
pub use eval_context::EvaluationContext;
pub use evaluator::{evaluate, render, EvaluationResult, Replacement};
pub use functions::{FilterFn, FunctionTable};
pub use parser::{parse_path, ParseMode, Template};
pub use store::{substitute, VariableStore};
