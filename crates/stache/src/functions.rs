/*
 * functions.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The filter registry.
//!
//! Filters take the evaluated argument (`None` when the chain had no
//! subject, e.g. `#{ | NowDate}` styles) and the rendered option strings,
//! and return `None` when they cannot produce a value; the evaluator then
//! treats the whole substitution as unresolved.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;

/// A filter implementation.
pub type FilterFn = Box<dyn Fn(Option<&str>, &[String]) -> Option<String> + Send + Sync>;

/// Case-insensitive name → filter map. `default()` registers the built-ins.
pub struct FunctionTable {
    entries: IndexMap<String, FilterFn>,
}

impl FunctionTable {
    /// An empty table with no filters registered.
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register a filter. Names are case-insensitive; an already-registered
    /// name (including every built-in) wins, and `false` is returned.
    pub fn register(
        &mut self,
        name: &str,
        f: impl Fn(Option<&str>, &[String]) -> Option<String> + Send + Sync + 'static,
    ) -> bool {
        let key = name.to_lowercase();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, Box::new(f));
        true
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.entries.get(&name.to_lowercase())
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register("ToUpper", |input, _| {
            input.map(str::to_uppercase)
        });
        table.register("ToLower", |input, _| {
            input.map(str::to_lowercase)
        });
        table.register("Trim", |input, _| input.map(|s| s.trim().to_string()));
        table.register("Truncate", truncate);
        table.register("Substring", substring);
        table.register("Replace", replace);
        table.register("Append", |input, options| {
            input.map(|s| {
                let mut out = s.to_string();
                for opt in options {
                    out.push_str(opt);
                }
                out
            })
        });
        table.register("Prepend", |input, options| {
            input.map(|s| {
                let mut out: String = options.concat();
                out.push_str(s);
                out
            })
        });
        table.register("ToBase64", |input, _| {
            input.map(|s| BASE64.encode(s.as_bytes()))
        });
        table.register("FromBase64", |input, _| {
            let bytes = BASE64.decode(input?).ok()?;
            String::from_utf8(bytes).ok()
        });
        table.register("HtmlEscape", |input, _| input.map(markup_escape));
        table.register("XmlEscape", |input, _| input.map(markup_escape));
        table.register("UriEscape", |input, _| {
            input.map(|s| percent_encode(s, is_uri_safe))
        });
        table.register("UriDataEscape", |input, _| {
            input.map(|s| percent_encode(s, is_uri_data_safe))
        });
        table.register("JsonEscape", |input, _| {
            let quoted = serde_json::to_string(input?).ok()?;
            Some(quoted[1..quoted.len() - 1].to_string())
        });
        table.register("YamlSingleQuoteEscape", |input, _| {
            input.map(|s| s.replace('\'', "''"))
        });
        table.register("YamlDoubleQuoteEscape", |input, _| {
            input.map(yaml_double_quote_escape)
        });
        table.register("Indent", indent);
        table
    }
}

fn truncate(input: Option<&str>, options: &[String]) -> Option<String> {
    let s = input?;
    let n: usize = options.first()?.parse().ok()?;
    if s.chars().count() <= n {
        return Some(s.to_string());
    }
    let mut out: String = s.chars().take(n).collect();
    out.push_str("...");
    Some(out)
}

/// One option: length from the start. Two options: start then length.
/// Counts are in characters.
fn substring(input: Option<&str>, options: &[String]) -> Option<String> {
    let s = input?;
    let (start, length) = match options {
        [length] => (0, length.parse::<usize>().ok()?),
        [start, length, ..] => (start.parse::<usize>().ok()?, length.parse::<usize>().ok()?),
        [] => return None,
    };
    Some(s.chars().skip(start).take(length).collect())
}

fn replace(input: Option<&str>, options: &[String]) -> Option<String> {
    let s = input?;
    let pattern = options.first()?;
    if pattern.is_empty() {
        return Some(s.to_string());
    }
    let replacement = options.get(1).map_or("", String::as_str);
    Some(s.replace(pattern.as_str(), replacement))
}

/// A numeric option indents by that many spaces, any other option is used
/// as the literal line prefix; the default is four spaces. Every line is
/// prefixed.
fn indent(input: Option<&str>, options: &[String]) -> Option<String> {
    let s = input?;
    let prefix = match options.first() {
        None => "    ".to_string(),
        Some(opt) => match opt.parse::<usize>() {
            Ok(n) => " ".repeat(n),
            Err(_) => opt.clone(),
        },
    };
    Some(
        s.lines()
            .map(|line| format!("{prefix}{line}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn markup_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn yaml_double_quote_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}

fn is_uri_safe(c: char) -> bool {
    is_unreserved(c)
        || matches!(
            c,
            ':' | '/' | '?' | '#' | '[' | ']' | '@' | '!' | '$' | '&' | '\'' | '(' | ')' | '*'
                | '+' | ',' | ';' | '=' | '%'
        )
}

fn is_uri_data_safe(c: char) -> bool {
    is_unreserved(c)
}

fn percent_encode(s: &str, keep: fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if keep(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}
