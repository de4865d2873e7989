/*
 * analyzer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Static dependency analysis.
//!
//! Walks a parsed template without evaluating it and reports every
//! variable path it may read. References to an `each` enumerator are
//! rewritten onto the collection with a wildcard index, so
//! `#{each a in Octopus.Action}#{a.Name}#{/each}` reports
//! `Octopus.Action` and `Octopus.Action[*].Name`, never `a`.

use crate::ast::{
    CalcExpr, ContentExpression, Index, SymbolExpression, SymbolStep, TemplateToken,
};
use crate::parser::Template;

/// Loop locals are implementation details, not variable dependencies.
const LOOP_LOCAL_PREFIX: &str = "Octopus.Template.Each";

/// Distinct variable paths referenced by a template, canonicalized,
/// deduplicated case-insensitively, in first-seen order.
pub fn referenced_variables(template: &Template) -> Vec<String> {
    let mut analyzer = Analyzer { seen: Vec::new() };
    analyzer.visit_tokens(template.tokens(), None);
    analyzer.seen
}

/// One `each` scope: the enumerator name and the (already rewritten)
/// collection it ranges over.
struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    name: &'a str,
    collection: &'a SymbolExpression,
}

struct Analyzer {
    seen: Vec<String>,
}

impl Analyzer {
    fn visit_tokens(&mut self, tokens: &[TemplateToken], scope: Option<&Scope<'_>>) {
        for token in tokens {
            match token {
                TemplateToken::Text(_) => {}
                TemplateToken::Substitution(sub) => self.visit_content(&sub.expr, scope),
                TemplateToken::Conditional(cond) => {
                    self.visit_symbol(&cond.test.lhs, scope);
                    if let Some((_, crate::ast::Operand::Symbol(rhs))) = &cond.test.comparison {
                        self.visit_symbol(rhs, scope);
                    }
                    self.visit_tokens(&cond.truthy, scope);
                    self.visit_tokens(&cond.falsy, scope);
                }
                TemplateToken::Repetition(rep) => {
                    let collection = self.rewrite(&rep.collection, scope);
                    self.visit_dynamic_indexes(&rep.collection, scope);
                    self.add(&collection);
                    let child = Scope {
                        parent: scope,
                        name: &rep.enumerator,
                        collection: &collection,
                    };
                    self.visit_tokens(&rep.body, Some(&child));
                }
                TemplateToken::Calculation(calc) => self.visit_calc(&calc.expr, scope),
            }
        }
    }

    fn visit_content(&mut self, expr: &ContentExpression, scope: Option<&Scope<'_>>) {
        match expr {
            ContentExpression::Symbol(sym) => self.visit_symbol(sym, scope),
            ContentExpression::FunctionCall(call) => {
                if let Some(arg) = &call.argument {
                    self.visit_content(arg, scope);
                }
                self.visit_tokens(&call.options, scope);
            }
        }
    }

    fn visit_calc(&mut self, expr: &CalcExpr, scope: Option<&Scope<'_>>) {
        match expr {
            CalcExpr::Number(_) => {}
            CalcExpr::Symbol(sym) => self.visit_symbol(sym, scope),
            CalcExpr::Operation(lhs, _, rhs) => {
                self.visit_calc(lhs, scope);
                self.visit_calc(rhs, scope);
            }
        }
    }

    fn visit_symbol(&mut self, sym: &SymbolExpression, scope: Option<&Scope<'_>>) {
        self.visit_dynamic_indexes(sym, scope);
        let rewritten = self.rewrite(sym, scope);
        self.add(&rewritten);
    }

    /// Dynamic indexers read their inner symbol at evaluation time, so it
    /// is a dependency in its own right.
    fn visit_dynamic_indexes(&mut self, sym: &SymbolExpression, scope: Option<&Scope<'_>>) {
        for step in &sym.steps {
            if let SymbolStep::Indexer(Index::Dynamic(inner)) = step {
                self.visit_symbol(inner, scope);
            }
        }
    }

    /// Replace an enumerator head with the collection plus a wildcard index.
    fn rewrite(&self, sym: &SymbolExpression, scope: Option<&Scope<'_>>) -> SymbolExpression {
        let Some(head) = sym.head_identifier() else {
            return sym.clone();
        };
        let mut current = scope;
        while let Some(sc) = current {
            if sc.name.eq_ignore_ascii_case(head) {
                let mut steps = sc.collection.steps.clone();
                steps.push(SymbolStep::Indexer(Index::Wildcard));
                steps.extend(sym.steps[1..].iter().cloned());
                return SymbolExpression::new(steps);
            }
            current = sc.parent;
        }
        sym.clone()
    }

    fn add(&mut self, sym: &SymbolExpression) {
        let canonical = sym.to_string();
        if canonical
            .to_lowercase()
            .starts_with(&LOOP_LOCAL_PREFIX.to_lowercase())
        {
            return;
        }
        if !self
            .seen
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&canonical))
        {
            self.seen.push(canonical);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn analyze(source: &str) -> Vec<String> {
        let template = Template::parse(source).expect("template should parse");
        referenced_variables(&template)
    }

    #[test]
    fn test_simple_references_in_order() {
        assert_eq!(analyze("#{B} #{A} #{B}"), vec!["B", "A"]);
    }

    #[test]
    fn test_dedupe_is_case_insensitive() {
        assert_eq!(analyze("#{Foo}#{FOO}"), vec!["Foo"]);
    }

    #[test]
    fn test_filter_argument_and_options() {
        assert_eq!(
            analyze("#{Foo | Replace #{Pattern} x}"),
            vec!["Foo", "Pattern"]
        );
    }

    #[test]
    fn test_conditional_references() {
        assert_eq!(
            analyze("#{if A == B}#{C}#{else}#{D}#{/if}"),
            vec!["A", "B", "C", "D"]
        );
    }

    #[test]
    fn test_calc_references() {
        assert_eq!(analyze("#{calc A + 2 * B}"), vec!["A", "B"]);
    }

    #[test]
    fn test_each_rewrites_enumerator() {
        let refs = analyze("#{each a in Octopus.Action}#{a.Name}#{/each}");
        assert!(refs.contains(&"Octopus.Action".to_string()));
        assert!(refs.contains(&"Octopus.Action[*].Name".to_string()));
        assert!(!refs.iter().any(|r| r == "a"), "refs: {refs:?}");
    }

    #[test]
    fn test_nested_each_rewrites_through_scopes() {
        let refs = analyze(
            "#{each a in Outer}#{each b in a.Items}#{b.Id}#{/each}#{/each}",
        );
        assert!(refs.contains(&"Outer".to_string()));
        assert!(refs.contains(&"Outer[*].Items".to_string()));
        assert!(refs.contains(&"Outer[*].Items[*].Id".to_string()));
    }

    #[test]
    fn test_non_enumerator_heads_pass_through() {
        let refs = analyze("#{each a in Xs}#{Other.Value}#{/each}");
        assert!(refs.contains(&"Other.Value".to_string()));
    }

    #[test]
    fn test_dynamic_index_inner_symbol_reported() {
        assert_eq!(analyze("#{Map[#{Key}]}"), vec!["Key", "Map[#{Key}]"]);
    }

    #[test]
    fn test_loop_locals_not_reported() {
        let refs = analyze("#{each a in Xs}#{Octopus.Template.Each.Index}#{/each}");
        assert_eq!(refs, vec!["Xs"]);
    }
}
