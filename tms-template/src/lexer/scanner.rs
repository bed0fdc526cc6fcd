//! Lexer implementation

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const TRIM_CLOSE: &str = "-}}";

/// Lexer for the template language.
///
/// Text outside `{{ }}` is emitted verbatim, subject to the `{{- ` and ` -}}`
/// trim markers which strip adjacent whitespace from the neighbouring text.
/// `{{/* ... */}}` comments produce no tokens.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
    pos: usize,
    trim_next_text: bool,
}

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            pos: 0,
            trim_next_text: false,
        }
    }

    /// Tokenize the entire source. The last token is always `Eof`; lexing
    /// stops at the first `Error` token.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while self.scan_text(&mut tokens) {
            if !self.scan_action(&mut tokens) {
                break;
            }
        }

        let mark = self.mark();
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.span_from(mark),
        });
        tokens
    }

    /// Scan literal text up to the next `{{`. Returns false at end of input.
    fn scan_text(&mut self, tokens: &mut Vec<Token>) -> bool {
        let mark = self.mark();
        while self.peek_char().is_some() && !self.rest().starts_with(OPEN) {
            self.advance();
        }

        let mut text = &self.source[mark.pos..self.pos];
        if std::mem::take(&mut self.trim_next_text) {
            text = text.trim_start();
        }
        let at_action = self.rest().starts_with(OPEN);
        if at_action && self.opens_with_trim() {
            text = text.trim_end();
        }

        if !text.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Text(text.to_string()),
                span: self.span_from(mark),
            });
        }
        at_action
    }

    /// Scan one `{{ ... }}` action. Returns false if an error token was
    /// emitted.
    fn scan_action(&mut self, tokens: &mut Vec<Token>) -> bool {
        let mark = self.mark();
        let trim_left = self.opens_with_trim();
        self.advance();
        self.advance();
        if trim_left {
            self.advance();
        }
        self.skip_whitespace();

        if self.rest().starts_with("/*") {
            return self.scan_comment(tokens);
        }

        tokens.push(Token {
            kind: TokenKind::LeftDelim,
            span: self.span_from(mark),
        });

        loop {
            self.skip_whitespace();
            let mark = self.mark();

            if self.close_delim() {
                tokens.push(Token {
                    kind: TokenKind::RightDelim,
                    span: self.span_from(mark),
                });
                return true;
            }

            let kind = self.next_action_token();
            let is_error = matches!(kind, TokenKind::Error(_));
            tokens.push(Token {
                kind,
                span: self.span_from(mark),
            });
            if is_error {
                return false;
            }
        }
    }

    fn scan_comment(&mut self, tokens: &mut Vec<Token>) -> bool {
        let mark = self.mark();
        self.advance();
        self.advance();

        loop {
            if self.rest().starts_with("*/") {
                self.advance();
                self.advance();
                break;
            }
            if self.advance().is_none() {
                tokens.push(Token {
                    kind: TokenKind::Error("unclosed comment".to_string()),
                    span: self.span_from(mark),
                });
                return false;
            }
        }

        self.skip_whitespace();
        if self.close_delim() {
            return true;
        }
        tokens.push(Token {
            kind: TokenKind::Error("comment ends before closing delimiter".to_string()),
            span: self.span_from(mark),
        });
        false
    }

    /// Consume `}}` or `-}}` if present.
    fn close_delim(&mut self) -> bool {
        if self.rest().starts_with(TRIM_CLOSE) {
            for _ in 0..TRIM_CLOSE.len() {
                self.advance();
            }
            self.trim_next_text = true;
            true
        } else if self.rest().starts_with(CLOSE) {
            self.advance();
            self.advance();
            true
        } else {
            false
        }
    }

    /// `{{-` only trims when followed by whitespace, so `{{-3}}` stays a
    /// negative number.
    fn opens_with_trim(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("{{-")
            && rest[3..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_whitespace())
    }

    /// Get the next token inside an action.
    fn next_action_token(&mut self) -> TokenKind {
        let Some(c) = self.peek_char() else {
            return TokenKind::Error("unclosed action".to_string());
        };

        match c {
            '.' => {
                self.advance();
                if self.peek_char().is_some_and(is_ident_start) {
                    TokenKind::Field(self.scan_path())
                } else {
                    TokenKind::Dot
                }
            }
            '$' => {
                self.advance();
                let mut path = Vec::new();
                if self.peek_char() == Some('.') && self.peek_next_char().is_some_and(is_ident_start)
                {
                    self.advance();
                    path = self.scan_path();
                }
                TokenKind::Root(path)
            }
            '"' => self.scan_string(),
            '`' => self.scan_raw_string(),
            '|' => {
                self.advance();
                TokenKind::Pipe
            }
            '(' => {
                self.advance();
                TokenKind::LParen
            }
            ')' => {
                self.advance();
                TokenKind::RParen
            }
            '-' | '+' if self.peek_next_char().is_some_and(|n| n.is_ascii_digit()) => {
                self.scan_number()
            }
            c if c.is_ascii_digit() => self.scan_number(),
            c if is_ident_start(c) => self.scan_identifier(),
            other => {
                self.advance();
                TokenKind::Error(format!("unexpected {:?} in action", other))
            }
        }
    }

    /// Scan `A.B.C` after a leading `.`.
    fn scan_path(&mut self) -> Vec<String> {
        let mut path = vec![self.scan_word()];
        while self.peek_char() == Some('.') && self.peek_next_char().is_some_and(is_ident_start) {
            self.advance();
            path.push(self.scan_word());
        }
        path
    }

    fn scan_word(&mut self) -> String {
        let start = self.pos;
        while self.peek_char().is_some_and(is_ident_continue) {
            self.advance();
        }
        self.source[start..self.pos].to_string()
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let word = self.scan_word();
        match word.as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "range" => TokenKind::Range,
            "with" => TokenKind::With,
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "nil" => TokenKind::Nil,
            _ => TokenKind::Identifier(word),
        }
    }

    /// Scan a double-quoted string literal with escape sequences.
    fn scan_string(&mut self) -> TokenKind {
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return TokenKind::Error("unterminated string".to_string())
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => {
                            return TokenKind::Error(format!("unknown escape \\{}", other))
                        }
                        None => return TokenKind::Error("unterminated string".to_string()),
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        TokenKind::String(value)
    }

    /// Scan a backtick raw string; no escapes, may span lines.
    fn scan_raw_string(&mut self) -> TokenKind {
        self.advance();
        let start = self.pos;
        loop {
            match self.peek_char() {
                None => return TokenKind::Error("unterminated raw string".to_string()),
                Some('`') => {
                    let value = self.source[start..self.pos].to_string();
                    self.advance();
                    return TokenKind::String(value);
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        if matches!(self.peek_char(), Some('-') | Some('+')) {
            self.advance();
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_float = false;
        if self.peek_char() == Some('.') && self.peek_next_char().is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[start..self.pos];
        if is_float {
            match text.parse::<f64>() {
                Ok(n) => TokenKind::Float(n),
                Err(_) => TokenKind::Error(format!("invalid number: {}", text)),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Int(n),
                Err(_) => TokenKind::Error(format!("invalid number: {}", text)),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_whitespace()) {
            self.advance();
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn span_from(&self, mark: Mark) -> Span {
        Span {
            start: mark.pos,
            end: self.pos,
            line: mark.line,
            column: mark.column,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.source[self.pos..].chars();
        iter.next();
        iter.next()
    }

    fn advance(&mut self) -> Option<char> {
        let (i, c) = self.chars.next()?;
        self.pos = i + c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ============================================================================
// TESTS
// ============================================================================
