//! Lexer token types

use std::fmt;

// ============================================================================
// TOKENS
// ============================================================================

/// Token kinds for the template language.
///
/// Literal text between actions is a single [`TokenKind::Text`]; everything
/// inside `{{ }}` is split into the operand and keyword kinds below.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    LeftDelim,
    RightDelim,

    // Keywords
    If,
    Else,
    End,
    Range,
    With,

    // Operands
    Dot,
    Field(Vec<String>),
    Root(Vec<String>),
    Identifier(String),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,

    // Punctuation
    Pipe,
    LParen,
    RParen,

    Eof,
    Error(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Text(_) => write!(f, "text"),
            TokenKind::LeftDelim => write!(f, "{{{{"),
            TokenKind::RightDelim => write!(f, "}}}}"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::End => write!(f, "end"),
            TokenKind::Range => write!(f, "range"),
            TokenKind::With => write!(f, "with"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Field(path) => write!(f, ".{}", path.join(".")),
            TokenKind::Root(path) if path.is_empty() => write!(f, "$"),
            TokenKind::Root(path) => write!(f, "$.{}", path.join(".")),
            TokenKind::Identifier(name) => write!(f, "{}", name),
            TokenKind::String(s) => write!(f, "{:?}", s),
            TokenKind::Int(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::Bool(b) => write!(f, "{}", b),
            TokenKind::Nil => write!(f, "nil"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Source location span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
