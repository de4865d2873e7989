/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! This module defines the token and expression trees produced by the parser.
//! Every token carries the byte span of its original source text, which is
//! what makes round-trip reconstruction and missing-token diagnostics exact.

use std::fmt;

/// A byte range into the source text of the owning template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The source slice this span covers.
    pub fn raw<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

/// A token in a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    /// Literal text, with hash-escapes already folded.
    Text(TextToken),

    /// Substitution: `#{expr}` or `#{expr | Filter ...}`
    Substitution(SubstitutionToken),

    /// Conditional block: `#{if x}...#{else}...#{/if}` (or `unless`).
    Conditional(ConditionalToken),

    /// Iteration: `#{each x in Collection}...#{/each}`
    Repetition(RepetitionToken),

    /// Arithmetic: `#{calc 1 + Two}`
    Calculation(CalculationToken),
}

impl TemplateToken {
    /// Source span of this token.
    pub fn span(&self) -> Span {
        match self {
            TemplateToken::Text(t) => t.span,
            TemplateToken::Substitution(t) => t.span,
            TemplateToken::Conditional(t) => t.span,
            TemplateToken::Repetition(t) => t.span,
            TemplateToken::Calculation(t) => t.span,
        }
    }
}

/// Literal text node. `text` is the rendered form (hash folding applied);
/// the span still covers the escaped source form.
#[derive(Debug, Clone, PartialEq)]
pub struct TextToken {
    pub text: String,
    pub span: Span,
}

/// Substitution node: evaluates a content expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionToken {
    pub expr: ContentExpression,
    pub span: Span,
}

/// Conditional block. `unless` is desugared at parse time by swapping the
/// branches, so evaluation only ever sees the `if` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalToken {
    pub test: ConditionalTest,
    pub truthy: Vec<TemplateToken>,
    pub falsy: Vec<TemplateToken>,
    pub span: Span,
}

/// The test of a conditional: a symbol, optionally compared against a quoted
/// string or another symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalTest {
    pub lhs: SymbolExpression,
    pub comparison: Option<(ComparisonOp, Operand)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
}

/// Right-hand side of a conditional comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Quoted(String),
    Symbol(SymbolExpression),
}

/// Iteration block.
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionToken {
    pub enumerator: String,
    pub collection: SymbolExpression,
    pub body: Vec<TemplateToken>,
    pub reversed: bool,
    pub span: Span,
}

/// Arithmetic block. `expr_raw` preserves the source form of the expression
/// so that an unresolvable calculation can be echoed back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationToken {
    pub expr: CalcExpr,
    pub expr_raw: String,
    pub span: Span,
}

/// A content expression: either a plain symbol or a filter/function call
/// whose argument is itself a content expression (filter chains nest
/// left-to-right, innermost first).
#[derive(Debug, Clone, PartialEq)]
pub enum ContentExpression {
    Symbol(SymbolExpression),
    FunctionCall(FunctionCallExpression),
}

/// A filter/function invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallExpression {
    /// True when written with pipe syntax (`arg | Name opts`).
    pub filter_syntax: bool,
    pub name: String,
    pub argument: Option<Box<ContentExpression>>,
    /// Option tokens; these may themselves be substitutions or blocks and
    /// are rendered through a throwaway scope at call time.
    pub options: Vec<TemplateToken>,
}

/// A dotted/bracketed path identifying a value, e.g. `Octopus.Action[Name].Foo`.
///
/// Equality is case-insensitive over identifier names and literal indices;
/// this is the equality used by the resolver's cycle guard.
#[derive(Debug, Clone)]
pub struct SymbolExpression {
    pub steps: Vec<SymbolStep>,
}

impl SymbolExpression {
    pub fn new(steps: Vec<SymbolStep>) -> Self {
        Self { steps }
    }

    /// The leading identifier, if the expression starts with one.
    pub fn head_identifier(&self) -> Option<&str> {
        match self.steps.first() {
            Some(SymbolStep::Identifier(name)) => Some(name),
            _ => None,
        }
    }
}

impl PartialEq for SymbolExpression {
    fn eq(&self, other: &Self) -> bool {
        self.steps.len() == other.steps.len()
            && self.steps.iter().zip(&other.steps).all(|(a, b)| a == b)
    }
}

impl Eq for SymbolExpression {}

impl fmt::Display for SymbolExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                SymbolStep::Identifier(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                SymbolStep::Indexer(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// One step of a symbol path.
#[derive(Debug, Clone)]
pub enum SymbolStep {
    Identifier(String),
    Indexer(Index),
}

impl PartialEq for SymbolStep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SymbolStep::Identifier(a), SymbolStep::Identifier(b)) => {
                a.eq_ignore_ascii_case(b)
            }
            (SymbolStep::Indexer(a), SymbolStep::Indexer(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SymbolStep {}

/// A bracketed path step.
#[derive(Debug, Clone)]
pub enum Index {
    /// `[Literal text]`, nested brackets allowed.
    Literal(String),
    /// `[#{Some.Symbol}]` resolved at evaluation time.
    Dynamic(SymbolExpression),
    /// `[*]` selects the first indexable entry in insertion order.
    Wildcard,
    /// `[]`
    Empty,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Index::Literal(a), Index::Literal(b)) => a.eq_ignore_ascii_case(b),
            (Index::Dynamic(a), Index::Dynamic(b)) => a == b,
            (Index::Wildcard, Index::Wildcard) => true,
            (Index::Empty, Index::Empty) => true,
            _ => false,
        }
    }
}

impl Eq for Index {}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Literal(text) => f.write_str(text),
            Index::Dynamic(expr) => write!(f, "#{{{}}}", expr),
            Index::Wildcard => f.write_str("*"),
            Index::Empty => Ok(()),
        }
    }
}

/// An arithmetic expression tree. Built left-to-right with no operator
/// precedence; parentheses are the only grouping.
#[derive(Debug, Clone, PartialEq)]
pub enum CalcExpr {
    Number(f64),
    Symbol(SymbolExpression),
    Operation(Box<CalcExpr>, CalcOp, Box<CalcExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> SymbolStep {
        SymbolStep::Identifier(name.to_string())
    }

    #[test]
    fn test_symbol_equality_is_case_insensitive() {
        let a = SymbolExpression::new(vec![ident("Foo"), ident("Bar")]);
        let b = SymbolExpression::new(vec![ident("foo"), ident("BAR")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_symbol_equality_respects_structure() {
        let a = SymbolExpression::new(vec![ident("Foo")]);
        let b = SymbolExpression::new(vec![ident("Foo"), ident("Bar")]);
        assert_ne!(a, b);

        let c = SymbolExpression::new(vec![
            ident("Foo"),
            SymbolStep::Indexer(Index::Literal("x".to_string())),
        ]);
        let d = SymbolExpression::new(vec![
            ident("Foo"),
            SymbolStep::Indexer(Index::Literal("X".to_string())),
        ]);
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[test]
    fn test_symbol_display() {
        let expr = SymbolExpression::new(vec![
            ident("Octopus"),
            ident("Action"),
            SymbolStep::Indexer(Index::Literal("Package A".to_string())),
            SymbolStep::Indexer(Index::Wildcard),
            ident("Name"),
        ]);
        assert_eq!(expr.to_string(), "Octopus.Action[Package A][*].Name");
    }

    #[test]
    fn test_dynamic_index_display() {
        let inner = SymbolExpression::new(vec![ident("Key")]);
        let expr = SymbolExpression::new(vec![
            ident("Map"),
            SymbolStep::Indexer(Index::Dynamic(inner)),
        ]);
        assert_eq!(expr.to_string(), "Map[#{Key}]");
    }
}
