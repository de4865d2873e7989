/*
 * store_tests.rs
 * Copyright (c) 2025 Posit, PBC
 */

use std::env;
use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use stache::{ParseMode, TemplateError, VariableStore};

fn temp_file(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    path.push(format!("stache-test-{}-{name}", std::process::id()));
    path
}

#[test]
fn save_and_load_roundtrip() {
    let path = temp_file("roundtrip.json");
    let mut store = VariableStore::new();
    store.set("Name", "web");
    store.set("Octopus.Action[Package A].Version", "1.2.3");
    store.set("Greeting", "Hello #{Name}");
    store.save(&path).expect("save should succeed");

    let mut loaded = VariableStore::new();
    loaded.load(&path).expect("load should succeed");
    fs::remove_file(&path).ok();

    let names: Vec<&str> = loaded.names().collect();
    assert_eq!(
        names,
        vec!["Name", "Octopus.Action[Package A].Version", "Greeting"]
    );
    assert_eq!(
        loaded.get("Greeting").unwrap(),
        Some("Hello web".to_string())
    );
    assert_eq!(
        loaded
            .evaluate("#{Octopus.Action[Package A].Version}")
            .unwrap(),
        "1.2.3"
    );
}

#[test]
fn load_merges_and_coerces_values() {
    let path = temp_file("merge.json");
    fs::write(&path, r#"{"port": 8080, "Gone": null, "NAME": "db"}"#)
        .expect("write should succeed");

    let mut store = VariableStore::new();
    store.set("Name", "web");
    store.load(&path).expect("load should succeed");
    fs::remove_file(&path).ok();

    // The existing key keeps its original spelling but takes the new value.
    assert_eq!(store.get_raw("Name"), Some("db"));
    assert_eq!(store.get_raw("Port"), Some("8080"));
    assert_eq!(store.get_raw("Gone"), Some(""));
}

#[test]
fn load_rejects_malformed_json() {
    let path = temp_file("malformed.json");
    fs::write(&path, "not json at all").expect("write should succeed");
    let mut store = VariableStore::new();
    let err = store.load(&path).unwrap_err();
    fs::remove_file(&path).ok();
    assert!(matches!(err, TemplateError::Json(_)), "got {err:?}");
}

#[test]
fn load_missing_file_is_io_error() {
    let mut store = VariableStore::new();
    let err = store.load(&temp_file("does-not-exist.json")).unwrap_err();
    assert!(matches!(err, TemplateError::Io(_)), "got {err:?}");
}

#[test]
fn evaluation_is_deterministic_across_cache_clears() {
    let mut store = VariableStore::new();
    store.set("A", "#{B}!");
    store.set("B", "done");
    let source = "result: #{A}";
    let first = store.evaluate(source).expect("evaluate should succeed");
    store.clear_cache();
    let second = store.evaluate(source).expect("evaluate should succeed");
    assert_eq!(first, "result: done!");
    assert_eq!(first, second);
}

#[test]
fn diagnostics_through_the_facade() {
    let mut store = VariableStore::new();
    store.set("Known", "k");
    let result = store
        .evaluate_with_diagnostics("#{Known}#{Unknown}", ParseMode::Strict)
        .expect("evaluation should succeed");
    assert_eq!(result.output, "k#{Unknown}");
    assert_eq!(result.missing_tokens, vec!["#{Unknown}".to_string()]);

    // Lenient mode renders even syntactically broken templates.
    let result = store
        .evaluate_with_diagnostics("ok #{each } bad", ParseMode::Lenient)
        .expect("lenient evaluation should succeed");
    assert_eq!(result.output, "ok #{each } bad");
}

#[test]
fn referenced_variables_through_the_facade() {
    let store = VariableStore::new();
    let refs = store
        .referenced_variables("#{each a in Xs}#{a.Id}#{/each}#{Other}")
        .expect("analysis should succeed");
    assert_eq!(refs, vec!["Xs", "Xs[*].Id", "Other"]);
}
