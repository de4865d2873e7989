/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template evaluation.
//!
//! Evaluation renders a token stream against an [`EvaluationContext`].
//! Unresolvable substitutions are not errors: the raw source of the token
//! is echoed into the output and recorded in
//! [`EvaluationResult::missing_tokens`], so a template can be run again
//! later when more variables are known. Only strict parse failures and
//! cyclic references are hard errors.

use crate::ast::{
    CalcExpr, CalcOp, CalculationToken, ComparisonOp, ConditionalToken, ContentExpression,
    Operand, RepetitionToken, SubstitutionToken, TemplateToken,
};
use crate::binding::Binding;
use crate::error::TemplateResult;
use crate::eval_context::EvaluationContext;
use crate::parser::Template;

/// Loop-local variable names bound inside an `each` body.
const EACH_INDEX: &str = "Octopus.Template.Each.Index";
const EACH_FIRST: &str = "Octopus.Template.Each.First";
const EACH_LAST: &str = "Octopus.Template.Each.Last";

/// One successful substitution, positioned by output offsets. Offsets are
/// cumulative: they locate the replacement in the final output string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Raw source text of the token that was replaced.
    pub raw: String,
    pub start: usize,
    pub end: usize,
}

/// The outcome of an evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    pub output: String,
    /// Raw token texts that could not be resolved, deduplicated, in the
    /// order first encountered.
    pub missing_tokens: Vec<String>,
    /// Raw token texts that resolved to the reserved `null` marker.
    pub null_tokens: Vec<String>,
    pub replacements: Vec<Replacement>,
}

/// Evaluate a parsed template.
pub fn evaluate(
    template: &Template,
    ctx: &EvaluationContext<'_>,
) -> TemplateResult<EvaluationResult> {
    let mut out = Output::default();
    eval_tokens(template.tokens(), template.source(), ctx, &mut out)?;
    Ok(EvaluationResult {
        output: out.text,
        missing_tokens: out.missing,
        null_tokens: out.null,
        replacements: out.replacements,
    })
}

/// Evaluate and return only the output text. This is what nested-template
/// expansion uses; its diagnostics are intentionally discarded.
pub fn render(template: &Template, ctx: &EvaluationContext<'_>) -> TemplateResult<String> {
    Ok(evaluate(template, ctx)?.output)
}

/// The value of a content expression.
enum Value {
    Text(String),
    Null,
    Missing,
}

#[derive(Default)]
struct Output {
    text: String,
    missing: Vec<String>,
    null: Vec<String>,
    replacements: Vec<Replacement>,
}

impl Output {
    fn push_missing(&mut self, raw: &str) {
        if !self.missing.iter().any(|m| m.eq_ignore_ascii_case(raw)) {
            self.missing.push(raw.to_string());
        }
    }

    fn push_null(&mut self, raw: &str) {
        if !self.null.iter().any(|m| m.eq_ignore_ascii_case(raw)) {
            self.null.push(raw.to_string());
        }
    }
}

fn eval_tokens(
    tokens: &[TemplateToken],
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<()> {
    for token in tokens {
        match token {
            TemplateToken::Text(text) => out.text.push_str(&text.text),
            TemplateToken::Substitution(sub) => eval_substitution(sub, source, ctx, out)?,
            TemplateToken::Conditional(cond) => eval_conditional(cond, source, ctx, out)?,
            TemplateToken::Repetition(rep) => eval_repetition(rep, source, ctx, out)?,
            TemplateToken::Calculation(calc) => eval_calculation(calc, source, ctx, out)?,
        }
    }
    Ok(())
}

fn eval_substitution(
    token: &SubstitutionToken,
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<()> {
    let raw = token.span.raw(source);
    match eval_content(&token.expr, source, ctx, out)? {
        Value::Text(text) => {
            let start = out.text.len();
            out.text.push_str(&text);
            out.replacements.push(Replacement {
                raw: raw.to_string(),
                start,
                end: out.text.len(),
            });
        }
        Value::Null => {
            out.text.push_str(raw);
            out.push_null(raw);
        }
        Value::Missing => {
            out.text.push_str(raw);
            out.push_missing(raw);
        }
    }
    Ok(())
}

fn eval_content(
    expr: &ContentExpression,
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<Value> {
    match expr {
        ContentExpression::Symbol(sym) => {
            if sym.head_identifier().is_some_and(|h| h.eq_ignore_ascii_case("null"))
                && sym.steps.len() == 1
            {
                return Ok(Value::Null);
            }
            Ok(match ctx.resolve(sym)? {
                Some(text) => Value::Text(text),
                None => Value::Missing,
            })
        }
        ContentExpression::FunctionCall(call) => {
            if call.name.eq_ignore_ascii_case("null") {
                return Ok(Value::Null);
            }
            let input = match &call.argument {
                None => None,
                Some(arg) => match eval_content(arg, source, ctx, out)? {
                    Value::Text(text) => Some(text),
                    Value::Null => return Ok(Value::Null),
                    Value::Missing => return Ok(Value::Missing),
                },
            };
            let Some(filter) = ctx.functions().get(&call.name) else {
                return Ok(Value::Missing);
            };
            let mut options = Vec::with_capacity(call.options.len());
            for option in &call.options {
                options.push(render_option(option, source, ctx)?);
            }
            Ok(match filter(input.as_deref(), &options) {
                Some(text) => Value::Text(text),
                None => Value::Missing,
            })
        }
    }
}

/// Option tokens render through a throwaway child scope; their diagnostics
/// are not reported.
fn render_option(
    token: &TemplateToken,
    source: &str,
    ctx: &EvaluationContext<'_>,
) -> TemplateResult<String> {
    match token {
        TemplateToken::Text(text) => Ok(text.text.clone()),
        other => {
            let scope = ctx.child(Binding::new());
            let mut out = Output::default();
            eval_tokens(std::slice::from_ref(other), source, &scope, &mut out)?;
            Ok(out.text)
        }
    }
}

fn eval_conditional(
    token: &ConditionalToken,
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<()> {
    let lhs = ctx.resolve(&token.test.lhs)?;
    let take_truthy = match &token.test.comparison {
        None => lhs.as_deref().is_some_and(is_truthy),
        Some((op, operand)) => {
            let rhs = match operand {
                Operand::Quoted(text) => Some(text.clone()),
                Operand::Symbol(sym) => ctx.resolve(sym)?,
            };
            match (lhs, rhs) {
                (Some(l), Some(r)) => match op {
                    ComparisonOp::Eq => l == r,
                    ComparisonOp::Ne => l != r,
                },
                // An unresolved side never satisfies a comparison.
                _ => false,
            }
        }
    };
    let branch = if take_truthy {
        &token.truthy
    } else {
        &token.falsy
    };
    eval_tokens(branch, source, ctx, out)
}

/// A trimmed value is falsy iff it is empty, `0`, or (case-insensitively)
/// `false` or `no`.
pub(crate) fn is_truthy(value: &str) -> bool {
    let trimmed = value.trim();
    !(trimmed.is_empty()
        || trimmed == "0"
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed.eq_ignore_ascii_case("no"))
}

fn eval_repetition(
    token: &RepetitionToken,
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<()> {
    let Some(mut entries) = ctx.resolve_collection(&token.collection)? else {
        // An undefined collection iterates zero times, same as an empty
        // one; the unresolved block is still reported.
        out.push_missing(token.span.raw(source));
        return Ok(());
    };
    if token.reversed {
        entries.reverse();
    }
    let count = entries.len();
    for (i, (_, node)) in entries.into_iter().enumerate() {
        let mut locals = Binding::new();
        *locals.child_mut(&token.enumerator) = node;
        locals.set(EACH_INDEX, &i.to_string());
        locals.set(EACH_FIRST, if i == 0 { "True" } else { "False" });
        locals.set(EACH_LAST, if i + 1 == count { "True" } else { "False" });
        let scope = ctx.child(locals);
        eval_tokens(&token.body, source, &scope, out)?;
    }
    Ok(())
}

fn eval_calculation(
    token: &CalculationToken,
    source: &str,
    ctx: &EvaluationContext<'_>,
    out: &mut Output,
) -> TemplateResult<()> {
    match eval_calc(&token.expr, ctx)? {
        Some(n) => {
            let start = out.text.len();
            out.text.push_str(&format_number(n));
            out.replacements.push(Replacement {
                raw: token.span.raw(source).to_string(),
                start,
                end: out.text.len(),
            });
        }
        None => {
            let echo = format!("#{{{}}}", token.expr_raw);
            out.text.push_str(&echo);
            out.push_missing(&echo);
        }
    }
    Ok(())
}

fn eval_calc(expr: &CalcExpr, ctx: &EvaluationContext<'_>) -> TemplateResult<Option<f64>> {
    match expr {
        CalcExpr::Number(n) => Ok(Some(*n)),
        CalcExpr::Symbol(sym) => match ctx.resolve(sym)? {
            Some(text) => Ok(text.trim().parse::<f64>().ok()),
            None => Ok(None),
        },
        CalcExpr::Operation(lhs, op, rhs) => {
            let (Some(l), Some(r)) = (eval_calc(lhs, ctx)?, eval_calc(rhs, ctx)?) else {
                return Ok(None);
            };
            Ok(match op {
                CalcOp::Add => Some(l + r),
                CalcOp::Subtract => Some(l - r),
                CalcOp::Multiply => Some(l * r),
                CalcOp::Divide => {
                    if r == 0.0 {
                        None
                    } else {
                        Some(l / r)
                    }
                }
            })
        }
    }
}

/// Whole results print without a fractional part.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
