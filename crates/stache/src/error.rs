/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template parsing and evaluation.

use thiserror::Error;

/// Details of a syntax error, with a 1-based source position.
///
/// Kept separate from [`TemplateError`] so parse failures can be cloned into
/// the parse cache (negative results are memoized too).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// What the parser expected or found.
    pub message: String,
    /// Byte offset of the failure in the source text.
    pub offset: usize,
    /// 1-based line of the failure.
    pub line: usize,
    /// 1-based column of the failure.
    pub column: usize,
}

/// Errors that can occur during template operations.
///
/// Ordinary unresolved references are *not* errors: they are reported through
/// [`EvaluationResult::missing_tokens`](crate::evaluator::EvaluationResult).
/// Only structurally fatal conditions surface here.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Strict-mode syntax error. Lenient parsing never produces this.
    #[error("parse error at line {}, column {}: {}", .0.line, .0.column, .0.message)]
    Parse(ParseDiagnostic),

    /// A symbol resolution revisited an expression already being resolved
    /// anywhere in the active scope chain.
    #[error("cyclic reference detected while resolving {chain}")]
    CyclicReference {
        /// The full in-flight reference chain, innermost last.
        chain: String,
    },

    /// I/O error (variable-set persistence).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed variable-set file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
