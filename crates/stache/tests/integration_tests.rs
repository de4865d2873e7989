/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 */

use pretty_assertions::assert_eq;
use stache::{
    evaluate, referenced_variables, substitute, Binding, EvaluationContext, FunctionTable,
    ParseMode, Template, TemplateCache, TemplateError,
};

fn run(source: &str, vars: &[(&str, &str)]) -> String {
    substitute(source, vars.iter().copied()).expect("evaluation should succeed")
}

fn diagnostics(source: &str, vars: &[(&str, &str)]) -> stache::EvaluationResult {
    let functions = FunctionTable::default();
    let cache = TemplateCache::default();
    let template = Template::parse(source).expect("template should parse");
    let ctx = EvaluationContext::new(Binding::from_flat(vars.iter().copied()), &functions, &cache);
    evaluate(&template, &ctx).expect("evaluation should succeed")
}

#[test]
fn plain_text_passes_through() {
    assert_eq!(run("no directives here", &[]), "no directives here");
}

#[test]
fn simple_substitution() {
    assert_eq!(run("Hello #{Name}!", &[("Name", "World")]), "Hello World!");
}

#[test]
fn names_are_case_insensitive() {
    assert_eq!(run("#{name}", &[("NAME", "x")]), "x");
}

#[test]
fn missing_variable_echoes_raw_and_reports() {
    let result = diagnostics("a #{Missing} b", &[]);
    assert_eq!(result.output, "a #{Missing} b");
    assert_eq!(result.missing_tokens, vec!["#{Missing}".to_string()]);
}

#[test]
fn recursive_values_expand() {
    assert_eq!(
        run(
            "#{Url}",
            &[
                ("Url", "#{Scheme}://#{Host}/"),
                ("Scheme", "https"),
                ("Host", "example.test"),
            ],
        ),
        "https://example.test/"
    );
}

#[test]
fn cyclic_reference_is_a_hard_error() {
    let err = substitute("#{A}", [("A", "#{B}"), ("B", "#{A}")]).unwrap_err();
    match err {
        TemplateError::CyclicReference { chain } => {
            assert!(chain.contains('A') && chain.contains('B'), "chain: {chain}");
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn hash_escaping() {
    assert_eq!(run("##{foo}", &[("foo", "x")]), "#{foo}");
    assert_eq!(run("###{foo}", &[("foo", "x")]), "#x");
    assert_eq!(run("a # b", &[]), "a # b");
}

#[test]
fn conditionals() {
    let vars = [("Yes", "true"), ("No", "false"), ("Env", "prod")];
    assert_eq!(run("#{if Yes}a#{/if}", &vars), "a");
    assert_eq!(run("#{if No}a#{else}b#{/if}", &vars), "b");
    assert_eq!(run("#{unless No}a#{/unless}", &vars), "a");
    assert_eq!(run("#{if Env == \"prod\"}live#{else}test#{/if}", &vars), "live");
    assert_eq!(run("#{if Env != \"prod\"}live#{else}test#{/if}", &vars), "test");
}

#[test]
fn indexed_iteration_preserves_insertion_order() {
    assert_eq!(
        run(
            "#{each a in Octopus.Action}#{a}-#{a.Name}#{/each}",
            &[
                ("Octopus.Action[Package A].Name", "A"),
                ("Octopus.Action[Package B].Name", "B"),
            ],
        ),
        "Package A-APackage B-B"
    );
}

#[test]
fn iteration_over_missing_collection_is_empty() {
    assert_eq!(run("#{each x in Gone}#{x}#{/each}", &[]), "");
    let result = diagnostics("#{each x in Gone}#{x}#{/each}", &[]);
    assert_eq!(
        result.missing_tokens,
        vec!["#{each x in Gone}#{x}#{/each}".to_string()]
    );
}

#[test]
fn iteration_over_json_array_value() {
    assert_eq!(
        run("#{each p in Ports}[#{p}]#{/each}", &[("Ports", "[80, 443]")]),
        "[80][443]"
    );
}

#[test]
fn filter_chain_applies_in_written_order() {
    assert_eq!(run("#{Foo|ToUpper|ToLower}", &[("Foo", "aBc")]), "abc");
}

#[test]
fn filters_with_options() {
    assert_eq!(
        run("#{Path | Replace \\ /}", &[("Path", r"a\b\c")]),
        "a/b/c"
    );
    assert_eq!(run("#{V | Truncate 2}", &[("V", "abcdef")]), "ab...");
}

#[test]
fn dynamic_index_resolves_through_current_scope() {
    assert_eq!(
        run(
            "#{Map[#{Key}]}",
            &[("Key", "b"), ("Map[a]", "1"), ("Map[b]", "2")],
        ),
        "2"
    );
}

#[test]
fn wildcard_index_selects_first_entry() {
    assert_eq!(
        run(
            "#{Steps[*].Status}",
            &[("Steps[one].Status", "ok"), ("Steps[two].Status", "bad")],
        ),
        "ok"
    );
}

#[test]
fn structured_json_descent() {
    assert_eq!(
        run(
            "#{Config.Svc.Ports[1]}",
            &[("Config", r#"{"Svc": {"Ports": [80, 443]}}"#)],
        ),
        "443"
    );
}

#[test]
fn structured_yaml_descent() {
    assert_eq!(
        run("#{Doc.Name}", &[("Doc", "Name: web\nPort: 80\n")]),
        "web"
    );
}

#[test]
fn calc_arithmetic() {
    assert_eq!(run("#{calc 1 + 2}", &[]), "3");
    assert_eq!(run("#{calc 2 + 3 * 4}", &[]), "20");
    assert_eq!(run("#{calc 2 + (3 * 4)}", &[]), "14");
    assert_eq!(run("#{calc N * 2}", &[("N", "21")]), "42");
}

#[test]
fn calc_with_unresolved_symbol_echoes_expression() {
    let result = diagnostics("#{calc C+2}", &[]);
    assert_eq!(result.output, "#{C+2}");
    assert_eq!(result.missing_tokens, vec!["#{C+2}".to_string()]);
}

#[test]
fn null_marker_is_reported_separately() {
    let result = diagnostics("#{null}", &[]);
    assert_eq!(result.output, "#{null}");
    assert_eq!(result.null_tokens, vec!["#{null}".to_string()]);
    assert!(result.missing_tokens.is_empty());
}

#[test]
fn replacements_use_output_offsets() {
    let result = diagnostics("#{A}==#{B}", &[("A", "long-value"), ("B", "b")]);
    assert_eq!(result.output, "long-value==b");
    let spans: Vec<(usize, usize)> = result
        .replacements
        .iter()
        .map(|r| (r.start, r.end))
        .collect();
    assert_eq!(spans, vec![(0, 10), (12, 13)]);
}

#[test]
fn strict_parse_error_carries_position() {
    let err = Template::parse("line one\n#{each oops}").unwrap_err();
    match err {
        TemplateError::Parse(diag) => {
            assert_eq!(diag.line, 2);
            assert!(diag.column > 1);
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn lenient_parse_always_succeeds_and_round_trips() {
    let source = "good #{Name} bad #{each oops} tail";
    let template =
        Template::parse_with_mode(source, ParseMode::Lenient).expect("lenient never fails");
    let rebuilt: String = template
        .tokens()
        .iter()
        .map(|t| t.span().raw(template.source()))
        .collect();
    assert_eq!(rebuilt, source);
}

#[test]
fn strict_round_trip_reconstructs_source() {
    let source = "x##{esc}#{if A}y#{each i in Xs}#{i}#{/each}#{else}z#{/if}#{calc 1+1}";
    let template = Template::parse(source).expect("template should parse");
    let rebuilt: String = template
        .tokens()
        .iter()
        .map(|t| t.span().raw(template.source()))
        .collect();
    assert_eq!(rebuilt, source);
}

#[test]
fn analyzer_reports_collection_not_enumerator() {
    let template =
        Template::parse("#{each a in Octopus.Action}#{a.Name}#{/each}").expect("parse");
    let refs = referenced_variables(&template);
    assert!(refs.contains(&"Octopus.Action".to_string()), "refs: {refs:?}");
    assert!(
        refs.contains(&"Octopus.Action[*].Name".to_string()),
        "refs: {refs:?}"
    );
    assert!(!refs.iter().any(|r| r.eq_ignore_ascii_case("a")), "refs: {refs:?}");
}

#[test]
fn analyzer_walks_every_construct() {
    let template = Template::parse(
        "#{if A == B}#{C|ToUpper #{D}}#{/if}#{calc E + 1}#{Map[#{K}]}",
    )
    .expect("parse");
    let refs = referenced_variables(&template);
    for expected in ["A", "B", "C", "D", "E", "K"] {
        assert!(refs.contains(&expected.to_string()), "missing {expected}: {refs:?}");
    }
}

#[test]
fn loop_locals_are_available_in_bodies() {
    assert_eq!(
        run(
            "#{each x in Xs}#{if Octopus.Template.Each.Last}#{x}#{else}#{x}, #{/if}#{/each}",
            &[("Xs[a]", "1"), ("Xs[b]", "2"), ("Xs[c]", "3")],
        ),
        "1, 2, 3"
    );
}

#[test]
fn reversed_iteration() {
    assert_eq!(
        run(
            "#{each x in Xs reversed}#{x}#{/each}",
            &[("Xs[1]", "a"), ("Xs[2]", "b"), ("Xs[3]", "c")],
        ),
        "cba"
    );
}

#[test]
fn nested_templates_see_enclosing_scope() {
    assert_eq!(
        run(
            "#{each s in Servers}#{Banner} #{/each}",
            &[
                ("Servers[web].Host", "w"),
                ("Servers[db].Host", "d"),
                ("Banner", "on #{s.Host}"),
            ],
        ),
        "on w on d "
    );
}
