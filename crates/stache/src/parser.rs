/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Recursive-descent parser for the `#{…}` template language.
//!
//! The parser produces a flat token stream with nested bodies for blocks.
//! It runs in one of two modes:
//!
//! - [`ParseMode::Strict`]: the first syntax error aborts parsing and no
//!   token stream is produced.
//! - [`ParseMode::Lenient`]: an unparsable span degrades to a literal
//!   [`TextToken`] covering the text up to the next possible parse point,
//!   and parsing continues. Lenient parsing always yields a complete
//!   template.
//!
//! Every token records the byte span of the source it was parsed from, so
//! concatenating the spans of the top-level tokens reconstructs the source
//! exactly.

use crate::ast::{
    CalcExpr, CalcOp, CalculationToken, ComparisonOp, ConditionalTest, ConditionalToken,
    ContentExpression, FunctionCallExpression, Index, Operand, RepetitionToken, Span,
    SubstitutionToken, SymbolExpression, SymbolStep, TemplateToken, TextToken,
};
use crate::error::{ParseDiagnostic, TemplateError, TemplateResult};

/// How the parser reacts to syntax errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseMode {
    /// Halt at the first error.
    Strict,
    /// Degrade unparsable spans to literal text and continue.
    Lenient,
}

/// A parsed template, ready for evaluation.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    tokens: Vec<TemplateToken>,
    mode: ParseMode,
}

impl Template {
    /// Parse a template in strict mode.
    pub fn parse(source: &str) -> TemplateResult<Self> {
        Self::parse_with_mode(source, ParseMode::Strict)
    }

    /// Parse a template in the given mode. Lenient parsing cannot fail.
    pub fn parse_with_mode(source: &str, mode: ParseMode) -> TemplateResult<Self> {
        let mut parser = Parser {
            src: source,
            pos: 0,
            mode,
        };
        match parser.parse_sequence(None, false) {
            Ok((tokens, _)) => Ok(Template {
                source: source.to_string(),
                tokens,
                mode,
            }),
            Err(e) => Err(TemplateError::Parse(diagnostic(source, e))),
        }
    }

    /// The token stream of this template.
    pub fn tokens(&self) -> &[TemplateToken] {
        &self.tokens
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The mode this template was parsed in.
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// True when any token other than literal text is present.
    pub fn has_substitutions(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| !matches!(t, TemplateToken::Text(_)))
    }
}

/// Parse a flat variable name (e.g. `Octopus.Action[Package A].Name`) as a
/// symbol expression. Returns `None` unless the whole text is a symbol.
pub fn parse_path(text: &str) -> Option<SymbolExpression> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        mode: ParseMode::Strict,
    };
    let symbol = parser.parse_symbol(IdentStyle::Default).ok()?;
    parser.skip_ws();
    if parser.pos == text.len() {
        Some(symbol)
    } else {
        None
    }
}

/// Internal syntax error with a byte offset; converted to a
/// [`ParseDiagnostic`] at the public boundary.
#[derive(Debug)]
struct SyntaxError {
    message: String,
    offset: usize,
}

fn diagnostic(source: &str, error: SyntaxError) -> ParseDiagnostic {
    let prefix = &source[..error.offset.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = prefix
        .rfind('\n')
        .map_or_else(|| prefix.chars().count(), |nl| prefix[nl + 1..].chars().count())
        + 1;
    ParseDiagnostic {
        message: error.message,
        offset: error.offset,
        line,
        column,
    }
}

/// Identifier flavors. Calculation operands exclude the characters that act
/// as arithmetic operators or grouping; `each` headers treat `reversed` as a
/// boundary word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentStyle {
    Default,
    EachHeader,
    Calc,
}

fn is_ident_char(c: char, style: IdentStyle) -> bool {
    match style {
        IdentStyle::Default | IdentStyle::EachHeader => {
            c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '/' | '~' | '(' | ')')
        }
        IdentStyle::Calc => c.is_alphanumeric() || matches!(c, '_' | ':' | '~'),
    }
}

/// How a block body ended.
enum SequenceEnd {
    Eof,
    Else,
    Closed,
}

enum BlockMarker {
    Else,
    Close(String),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    mode: ParseMode,
}

impl<'a> Parser<'a> {
    fn char_at(&self, offset: usize) -> Option<char> {
        self.src[offset..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        self.char_at(self.pos)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.src[self.pos..].starts_with(prefix)
    }

    fn eat_str(&mut self, prefix: &str) -> bool {
        if self.starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, c: char) -> Result<(), SyntaxError> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected '{c}'")))
        }
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        self.err_at(self.pos, message)
    }

    fn err_at(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset,
        }
    }

    /// Parse tokens until EOF or a block marker. `close` names the keyword
    /// whose `#{/kw}` terminates this sequence; `allow_else` permits a
    /// single `#{else}` terminator.
    fn parse_sequence(
        &mut self,
        close: Option<&str>,
        allow_else: bool,
    ) -> Result<(Vec<TemplateToken>, SequenceEnd), SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            if let Some(text) = self.scan_text() {
                tokens.push(TemplateToken::Text(text));
            }
            if self.pos >= self.src.len() {
                return match close {
                    None => Ok((tokens, SequenceEnd::Eof)),
                    Some(kw) => Err(self.err(format!("missing '#{{/{kw}}}'"))),
                };
            }

            // Now positioned at a directive opener `#{`.
            let start = self.pos;
            if let Some((marker, end)) = self.peek_block_marker() {
                match marker {
                    BlockMarker::Else if allow_else => {
                        self.pos = end;
                        return Ok((tokens, SequenceEnd::Else));
                    }
                    BlockMarker::Close(ref kw) if close == Some(kw.as_str()) => {
                        self.pos = end;
                        return Ok((tokens, SequenceEnd::Closed));
                    }
                    _ => {
                        let shown = match &marker {
                            BlockMarker::Else => "#{else}".to_string(),
                            BlockMarker::Close(kw) => format!("#{{/{kw}}}"),
                        };
                        let e = self.err_at(start, format!("unexpected '{shown}'"));
                        match self.mode {
                            ParseMode::Strict => return Err(e),
                            ParseMode::Lenient => {
                                self.recover(start, &mut tokens);
                                continue;
                            }
                        }
                    }
                }
            }

            match self.parse_directive() {
                Ok(token) => tokens.push(token),
                Err(e) => match self.mode {
                    ParseMode::Strict => return Err(e),
                    ParseMode::Lenient => self.recover(start, &mut tokens),
                },
            }
        }
    }

    /// Lenient-mode recovery: the span from `start` to the next possible
    /// directive opener becomes a literal text token.
    fn recover(&mut self, start: usize, tokens: &mut Vec<TemplateToken>) {
        let rest = &self.src[start + 2..];
        let mut end = match rest.find("#{") {
            Some(off) => start + 2 + off,
            None => self.src.len(),
        };
        // Back off over an escape run so hash folding still applies to it.
        while end > start + 2 && self.src.as_bytes()[end - 1] == b'#' {
            end -= 1;
        }
        tokens.push(TemplateToken::Text(TextToken {
            text: self.src[start..end].to_string(),
            span: Span::new(start, end),
        }));
        self.pos = end;
    }

    /// Scan literal text up to the next directive opener, folding `#`
    /// escapes: a run of N hashes before `{` contributes `N/2` literal
    /// hashes; an odd run leaves `#{` to start a directive, an even run
    /// makes the brace literal. `##{x}` is therefore the literal text
    /// `#{x}` and `###{x}` is `#` followed by the directive `#{x}`.
    fn scan_text(&mut self) -> Option<TextToken> {
        let start = self.pos;
        let mut cooked = String::new();
        let mut i = self.pos;
        while i < self.src.len() {
            let Some(c) = self.char_at(i) else { break };
            if c == '#' {
                let run_start = i;
                let mut n = 0usize;
                while self.char_at(i) == Some('#') {
                    n += 1;
                    i += 1;
                }
                if self.char_at(i) == Some('{') {
                    for _ in 0..n / 2 {
                        cooked.push('#');
                    }
                    if n % 2 == 1 {
                        // Directive begins at the final hash of the run.
                        i = run_start + n - 1;
                        break;
                    }
                    cooked.push('{');
                    i += 1;
                } else {
                    for _ in 0..n {
                        cooked.push('#');
                    }
                }
            } else {
                cooked.push(c);
                i += c.len_utf8();
            }
        }
        if i == start {
            return None;
        }
        let span = Span::new(start, i);
        self.pos = i;
        Some(TextToken { text: cooked, span })
    }

    /// Peek for `#{else}` or `#{/kw}` without consuming. Returns the marker
    /// and the position just past its closing brace.
    fn peek_block_marker(&self) -> Option<(BlockMarker, usize)> {
        let mut i = self.skip_ws_at(self.pos + 2);
        if self.char_at(i) == Some('/') {
            i += 1;
            let word_start = i;
            while self.char_at(i).is_some_and(|c| c.is_ascii_alphabetic()) {
                i += 1;
            }
            if i == word_start {
                return None;
            }
            let kw = self.src[word_start..i].to_string();
            i = self.skip_ws_at(i);
            if self.char_at(i) == Some('}') {
                return Some((BlockMarker::Close(kw), i + 1));
            }
            return None;
        }
        let word_start = i;
        while self.char_at(i).is_some_and(|c| c.is_ascii_alphabetic()) {
            i += 1;
        }
        if &self.src[word_start..i] == "else" {
            i = self.skip_ws_at(i);
            if self.char_at(i) == Some('}') {
                return Some((BlockMarker::Else, i + 1));
            }
        }
        None
    }

    fn skip_ws_at(&self, mut i: usize) -> usize {
        while let Some(c) = self.char_at(i) {
            if !c.is_whitespace() {
                break;
            }
            i += c.len_utf8();
        }
        i
    }

    /// Parse one directive starting at `#{`.
    fn parse_directive(&mut self) -> Result<TemplateToken, SyntaxError> {
        let start = self.pos;
        self.pos += 2; // "#{"
        self.skip_ws();
        if self.keyword("if") {
            self.parse_conditional(start, false)
        } else if self.keyword("unless") {
            self.parse_conditional(start, true)
        } else if self.keyword("each") {
            self.parse_repetition(start)
        } else if self.keyword("calc") {
            self.parse_calculation(start)
        } else {
            let expr = self.parse_content_expression()?;
            self.skip_ws();
            self.expect('}')?;
            Ok(TemplateToken::Substitution(SubstitutionToken {
                expr,
                span: Span::new(start, self.pos),
            }))
        }
    }

    /// Consume a block keyword if present. Keywords must be followed by
    /// whitespace so identifiers like `ifconfig` stay identifiers.
    fn keyword(&mut self, kw: &str) -> bool {
        if self.starts_with(kw)
            && self
                .char_at(self.pos + kw.len())
                .is_some_and(char::is_whitespace)
        {
            self.pos += kw.len();
            self.skip_ws();
            true
        } else {
            false
        }
    }

    fn parse_conditional(
        &mut self,
        start: usize,
        is_unless: bool,
    ) -> Result<TemplateToken, SyntaxError> {
        let lhs = self.parse_symbol(IdentStyle::Default)?;
        self.skip_ws();
        let comparison = if self.eat_str("==") {
            Some((ComparisonOp::Eq, self.parse_operand()?))
        } else if self.eat_str("!=") {
            Some((ComparisonOp::Ne, self.parse_operand()?))
        } else {
            None
        };
        self.skip_ws();
        self.expect('}')?;

        let kw = if is_unless { "unless" } else { "if" };
        let (mut truthy, end) = self.parse_sequence(Some(kw), true)?;
        let mut falsy = if matches!(end, SequenceEnd::Else) {
            let (body, _) = self.parse_sequence(Some(kw), false)?;
            body
        } else {
            Vec::new()
        };
        if is_unless {
            std::mem::swap(&mut truthy, &mut falsy);
        }
        Ok(TemplateToken::Conditional(ConditionalToken {
            test: ConditionalTest { lhs, comparison },
            truthy,
            falsy,
            span: Span::new(start, self.pos),
        }))
    }

    fn parse_operand(&mut self) -> Result<Operand, SyntaxError> {
        self.skip_ws();
        if self.peek() == Some('"') {
            self.bump();
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == '"' {
                    break;
                }
                self.bump();
            }
            let text = self.src[start..self.pos].to_string();
            self.expect('"')?;
            Ok(Operand::Quoted(text))
        } else {
            Ok(Operand::Symbol(self.parse_symbol(IdentStyle::Default)?))
        }
    }

    fn parse_repetition(&mut self, start: usize) -> Result<TemplateToken, SyntaxError> {
        let enumerator = self.parse_identifier(IdentStyle::Default)?;
        self.skip_ws();
        if !self.keyword("in") {
            return Err(self.err("expected 'in'"));
        }
        let collection = self.parse_symbol(IdentStyle::EachHeader)?;
        self.skip_ws();
        let reversed = self.eat_reversed();
        self.skip_ws();
        self.expect('}')?;
        let (body, _) = self.parse_sequence(Some("each"), false)?;
        Ok(TemplateToken::Repetition(RepetitionToken {
            enumerator,
            collection,
            body,
            reversed,
            span: Span::new(start, self.pos),
        }))
    }

    fn eat_reversed(&mut self) -> bool {
        let word = self.src[self.pos..].get(..8);
        if word.is_some_and(|w| w.eq_ignore_ascii_case("reversed")) {
            let after = self.char_at(self.pos + 8);
            if after.is_none() || after.is_some_and(|c| c.is_whitespace() || c == '}') {
                self.pos += 8;
                return true;
            }
        }
        false
    }

    fn parse_calculation(&mut self, start: usize) -> Result<TemplateToken, SyntaxError> {
        let expr_start = self.pos;
        let expr = self.parse_calc_expr()?;
        let expr_raw = self.src[expr_start..self.pos].trim().to_string();
        self.skip_ws();
        self.expect('}')?;
        Ok(TemplateToken::Calculation(CalculationToken {
            expr,
            expr_raw,
            span: Span::new(start, self.pos),
        }))
    }

    /// Left-to-right arithmetic chain: `1 + 2 * 3` is `(1 + 2) * 3`.
    /// Parentheses are the only grouping.
    fn parse_calc_expr(&mut self) -> Result<CalcExpr, SyntaxError> {
        let mut acc = self.parse_calc_operand()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('+') => CalcOp::Add,
                Some('-') => CalcOp::Subtract,
                Some('*') => CalcOp::Multiply,
                Some('/') => CalcOp::Divide,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_calc_operand()?;
            acc = CalcExpr::Operation(Box::new(acc), op, Box::new(rhs));
        }
        Ok(acc)
    }

    fn parse_calc_operand(&mut self) -> Result<CalcExpr, SyntaxError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let expr = self.parse_calc_expr()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(expr)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.bump();
                }
                let text = &self.src[start..self.pos];
                text.parse::<f64>()
                    .map(CalcExpr::Number)
                    .map_err(|_| self.err_at(start, format!("invalid number '{text}'")))
            }
            Some(c) if is_ident_char(c, IdentStyle::Calc) => {
                Ok(CalcExpr::Symbol(self.parse_symbol(IdentStyle::Calc)?))
            }
            _ => Err(self.err("expected calculation operand")),
        }
    }

    /// `Symbol := Identifier (('.' Identifier) | Indexer)*`
    fn parse_symbol(&mut self, style: IdentStyle) -> Result<SymbolExpression, SyntaxError> {
        let mut steps = vec![SymbolStep::Identifier(self.parse_identifier(style)?)];
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    steps.push(SymbolStep::Identifier(self.parse_identifier(style)?));
                }
                Some('[') => {
                    self.bump();
                    steps.push(SymbolStep::Indexer(self.parse_index()?));
                }
                _ => break,
            }
        }
        Ok(SymbolExpression::new(steps))
    }

    /// Identifiers allow internal whitespace; trailing whitespace is
    /// trimmed, and a whitespace boundary before a reserved word (`in`,
    /// `==`, `!=`, and `reversed` in `each` headers) ends the identifier.
    fn parse_identifier(&mut self, style: IdentStyle) -> Result<String, SyntaxError> {
        let start = self.pos;
        loop {
            let Some(c) = self.peek() else { break };
            if c == ' ' || c == '\t' {
                if style != IdentStyle::Calc && self.keyword_boundary(style) {
                    break;
                }
                self.bump();
            } else if is_ident_char(c, style) {
                self.bump();
            } else {
                break;
            }
        }
        let text = self.src[start..self.pos].trim();
        if text.is_empty() {
            return Err(self.err_at(start, "expected identifier"));
        }
        Ok(text.to_string())
    }

    fn keyword_boundary(&self, style: IdentStyle) -> bool {
        let mut i = self.pos;
        while self.char_at(i).is_some_and(|c| c == ' ' || c == '\t') {
            i += 1;
        }
        let rest = &self.src[i..];
        if rest.starts_with("==") || rest.starts_with("!=") {
            return true;
        }
        if rest.starts_with("in")
            && rest[2..].chars().next().is_some_and(char::is_whitespace)
        {
            return true;
        }
        if style == IdentStyle::EachHeader {
            let word = rest.get(..8);
            if word.is_some_and(|w| w.eq_ignore_ascii_case("reversed")) {
                let after = rest[8..].chars().next();
                if after.is_none() || after.is_some_and(|c| c.is_whitespace() || c == '}') {
                    return true;
                }
            }
        }
        false
    }

    /// Indexer body after `[`: a `#{…}` dynamic symbol, `*`, empty, or
    /// literal text with balanced nested brackets.
    fn parse_index(&mut self) -> Result<Index, SyntaxError> {
        if self.starts_with("#{") {
            self.pos += 2;
            self.skip_ws();
            let inner = self.parse_symbol(IdentStyle::Default)?;
            self.skip_ws();
            self.expect('}')?;
            self.expect(']')?;
            return Ok(Index::Dynamic(inner));
        }
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.err_at(start, "unterminated indexer")),
                Some('[') => {
                    depth += 1;
                    self.bump();
                }
                Some(']') => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }
        let text = &self.src[start..self.pos];
        let index = if text.is_empty() {
            Index::Empty
        } else if text == "*" {
            Index::Wildcard
        } else {
            Index::Literal(text.to_string())
        };
        self.expect(']')?;
        Ok(index)
    }

    /// `Symbol? ('|' FilterName FilterOption*)*`, folded left-to-right so
    /// the first filter is innermost.
    fn parse_content_expression(&mut self) -> Result<ContentExpression, SyntaxError> {
        self.skip_ws();
        let mut expr = if self.peek() == Some('|') {
            None
        } else {
            Some(ContentExpression::Symbol(
                self.parse_symbol(IdentStyle::Default)?,
            ))
        };
        loop {
            self.skip_ws();
            if self.peek() != Some('|') {
                break;
            }
            self.bump();
            self.skip_ws();
            let name = self.parse_function_name()?;
            let options = self.parse_filter_options()?;
            expr = Some(ContentExpression::FunctionCall(FunctionCallExpression {
                filter_syntax: true,
                name,
                argument: expr.map(Box::new),
                options,
            }));
        }
        expr.ok_or_else(|| self.err("expected expression"))
    }

    fn parse_function_name(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if self.pos == start {
            return Err(self.err("expected filter name"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Filter options: quoted text, escape-quoted text, nested `#{…}`
    /// tokens, or bare words, up to the next `|` or the closing brace.
    fn parse_filter_options(&mut self) -> Result<Vec<TemplateToken>, SyntaxError> {
        let mut options = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.err("unterminated substitution")),
                Some('}' | '|') => break,
                Some('"') => {
                    let start = self.pos;
                    self.bump();
                    let text_start = self.pos;
                    loop {
                        match self.peek() {
                            Some('"') => break,
                            Some('#') => {
                                return Err(self.err("'#' is not allowed in a quoted option"))
                            }
                            Some(_) => self.bump(),
                            None => return Err(self.err_at(start, "unterminated quoted option")),
                        }
                    }
                    let text = self.src[text_start..self.pos].to_string();
                    self.bump();
                    options.push(TemplateToken::Text(TextToken {
                        text,
                        span: Span::new(start, self.pos),
                    }));
                }
                Some('\\') if self.starts_with("\\\"") => {
                    let start = self.pos;
                    self.pos += 2;
                    let text_start = self.pos;
                    let Some(off) = self.src[self.pos..].find("\\\"") else {
                        return Err(self.err_at(start, "unterminated escaped option"));
                    };
                    let text = self.src[text_start..text_start + off].to_string();
                    self.pos = text_start + off + 2;
                    options.push(TemplateToken::Text(TextToken {
                        text,
                        span: Span::new(start, self.pos),
                    }));
                }
                Some('#') => {
                    if self.starts_with("#{") {
                        options.push(self.parse_directive()?);
                    } else {
                        return Err(self.err("unexpected '#'"));
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    while let Some(c) = self.peek() {
                        if c.is_whitespace() || matches!(c, '|' | '}' | '"') {
                            break;
                        }
                        self.bump();
                    }
                    options.push(TemplateToken::Text(TextToken {
                        text: self.src[start..self.pos].to_string(),
                        span: Span::new(start, self.pos),
                    }));
                }
            }
        }
        Ok(options)
    }
}
