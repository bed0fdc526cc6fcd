//! Template syntax tree

use crate::lexer::Span;
use serde_json::Value;
use std::fmt;

/// A node in a parsed template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    /// `{{ pipeline }}`: evaluate and print.
    Action(Pipeline),
    /// `{{if}} ... {{else if}} ... {{else}} ... {{end}}`
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    /// `{{range}}`: body runs once per element with dot rebound.
    Range {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Option<Vec<Node>>,
    },
    /// `{{with}}`: body runs with dot rebound when the value is truthy.
    With {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Option<Vec<Node>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Pipeline,
    pub body: Vec<Node>,
}

/// Commands separated by `|`; each command's result is passed as the last
/// argument of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub operands: Vec<Operand>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Dot,
    Field(Vec<String>),
    Root(Vec<String>),
    Function(String),
    Literal(Value),
    Nested(Pipeline),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Dot => write!(f, "."),
            Operand::Field(path) => write!(f, ".{}", path.join(".")),
            Operand::Root(path) if path.is_empty() => write!(f, "$"),
            Operand::Root(path) => write!(f, "$.{}", path.join(".")),
            Operand::Function(name) => write!(f, "{}", name),
            Operand::Literal(value) => write!(f, "{}", value),
            Operand::Nested(_) => write!(f, "(...)"),
        }
    }
}

/// Error produced while lexing or parsing a template.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}
