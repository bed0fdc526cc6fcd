//! Parser implementation

use super::ast::*;
use crate::funcs;
use crate::lexer::*;
use serde_json::Value;

/// Parse template source into a node list.
pub fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse()
}

/// How a node list ended.
enum Terminator {
    Eof,
    End,
    Else,
    ElseIf(Pipeline),
}

/// Parser for the template language.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
}

impl Parser {
    /// Create a new parser from a vector of tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the tokens into a node list.
    pub fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        if let Some(token) = self
            .tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Error(_)))
        {
            let message = match &token.kind {
                TokenKind::Error(msg) => msg.clone(),
                _ => "lexer error".to_string(),
            };
            return Err(ParseError {
                message,
                line: token.span.line,
                column: token.span.column,
            });
        }

        let (nodes, end) = self.parse_list()?;
        match end {
            Terminator::Eof => Ok(nodes),
            Terminator::End => Err(self.error("unexpected {{end}}")),
            Terminator::Else | Terminator::ElseIf(_) => Err(self.error("unexpected {{else}}")),
        }
    }

    /// Parse nodes until `{{end}}`, `{{else}}` or end of input.
    fn parse_list(&mut self) -> Result<(Vec<Node>, Terminator), ParseError> {
        let mut nodes = Vec::new();

        loop {
            match &self.current().kind {
                TokenKind::Eof => return Ok((nodes, Terminator::Eof)),
                TokenKind::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    self.advance();
                }
                TokenKind::LeftDelim => {
                    self.advance();
                    match &self.current().kind {
                        TokenKind::End => {
                            self.advance();
                            self.expect(TokenKind::RightDelim)?;
                            return Ok((nodes, Terminator::End));
                        }
                        TokenKind::Else => {
                            self.advance();
                            if self.check(&TokenKind::If) {
                                self.advance();
                                let pipeline = self.parse_pipeline()?;
                                self.expect(TokenKind::RightDelim)?;
                                return Ok((nodes, Terminator::ElseIf(pipeline)));
                            }
                            self.expect(TokenKind::RightDelim)?;
                            return Ok((nodes, Terminator::Else));
                        }
                        TokenKind::If => {
                            self.advance();
                            nodes.push(self.parse_if()?);
                        }
                        TokenKind::Range => {
                            self.advance();
                            let (pipeline, body, otherwise) = self.parse_block("range")?;
                            nodes.push(Node::Range {
                                pipeline,
                                body,
                                otherwise,
                            });
                        }
                        TokenKind::With => {
                            self.advance();
                            let (pipeline, body, otherwise) = self.parse_block("with")?;
                            nodes.push(Node::With {
                                pipeline,
                                body,
                                otherwise,
                            });
                        }
                        _ => {
                            let pipeline = self.parse_pipeline()?;
                            self.expect(TokenKind::RightDelim)?;
                            nodes.push(Node::Action(pipeline));
                        }
                    }
                }
                other => {
                    let msg = format!("unexpected {}", other);
                    return Err(self.error(&msg));
                }
            }
        }
    }

    /// Parse the remainder of an `{{if ...}}` after the keyword.
    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let mut branches = Vec::new();
        let mut condition = self.parse_pipeline()?;
        self.expect(TokenKind::RightDelim)?;

        loop {
            let (body, end) = self.parse_list()?;
            branches.push(Branch { condition, body });
            match end {
                Terminator::End => {
                    return Ok(Node::If {
                        branches,
                        otherwise: None,
                    })
                }
                Terminator::ElseIf(next) => condition = next,
                Terminator::Else => {
                    let otherwise = self.parse_else_body("if")?;
                    return Ok(Node::If {
                        branches,
                        otherwise: Some(otherwise),
                    });
                }
                Terminator::Eof => return Err(self.error("unclosed {{if}}")),
            }
        }
    }

    /// Parse `range`/`with`: pipeline, body and optional else body.
    fn parse_block(
        &mut self,
        keyword: &str,
    ) -> Result<(Pipeline, Vec<Node>, Option<Vec<Node>>), ParseError> {
        let pipeline = self.parse_pipeline()?;
        self.expect(TokenKind::RightDelim)?;

        let (body, end) = self.parse_list()?;
        match end {
            Terminator::End => Ok((pipeline, body, None)),
            Terminator::Else => {
                let otherwise = self.parse_else_body(keyword)?;
                Ok((pipeline, body, Some(otherwise)))
            }
            Terminator::ElseIf(_) => {
                Err(self.error(&format!("{{{{else if}}}} is not allowed in {{{{{}}}}}", keyword)))
            }
            Terminator::Eof => Err(self.error(&format!("unclosed {{{{{}}}}}", keyword))),
        }
    }

    fn parse_else_body(&mut self, keyword: &str) -> Result<Vec<Node>, ParseError> {
        let (body, end) = self.parse_list()?;
        match end {
            Terminator::End => Ok(body),
            Terminator::Eof => Err(self.error(&format!("unclosed {{{{{}}}}}", keyword))),
            Terminator::Else | Terminator::ElseIf(_) => {
                Err(self.error(&format!("expected {{{{end}}}} after {{{{else}}}} in {}", keyword)))
            }
        }
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let span = self.current().span;
        let mut commands = vec![self.parse_command()?];

        while self.check(&TokenKind::Pipe) {
            self.advance();
            let command = self.parse_command()?;
            if !matches!(command.operands.first(), Some(Operand::Function(_))) {
                return Err(ParseError {
                    message: "non executable command in pipeline".to_string(),
                    line: command.span.line,
                    column: command.span.column,
                });
            }
            commands.push(command);
        }

        Ok(Pipeline { commands, span })
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        let span = self.current().span;
        let mut operands = Vec::new();

        while !matches!(
            self.current().kind,
            TokenKind::RightDelim | TokenKind::Pipe | TokenKind::RParen | TokenKind::Eof
        ) {
            operands.push(self.parse_operand()?);
        }

        match operands.first() {
            None => Err(self.error("missing value for command")),
            Some(first) if operands.len() > 1 && !matches!(first, Operand::Function(_)) => {
                Err(ParseError {
                    message: format!("can't give argument to non-function {}", first),
                    line: span.line,
                    column: span.column,
                })
            }
            _ => Ok(Command { operands, span }),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        let operand = match &self.current().kind {
            TokenKind::Dot => Operand::Dot,
            TokenKind::Field(path) => Operand::Field(path.clone()),
            TokenKind::Root(path) => Operand::Root(path.clone()),
            TokenKind::String(s) => Operand::Literal(Value::String(s.clone())),
            TokenKind::Int(n) => Operand::Literal(Value::from(*n)),
            TokenKind::Float(n) => Operand::Literal(
                serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            TokenKind::Bool(b) => Operand::Literal(Value::Bool(*b)),
            TokenKind::Nil => Operand::Literal(Value::Null),
            TokenKind::Identifier(name) => {
                if !funcs::is_defined(name) {
                    let msg = format!("function {:?} not defined", name);
                    return Err(self.error(&msg));
                }
                Operand::Function(name.clone())
            }
            TokenKind::LParen => {
                self.advance();
                let pipeline = self.parse_pipeline()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Operand::Nested(pipeline));
            }
            other => {
                let msg = format!("unexpected {} in operand", other);
                return Err(self.error(&msg));
            }
        };
        self.advance();
        Ok(operand)
    }

    // ------------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------------

    pub(crate) fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    pub(crate) fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            let msg = format!("expected {}, found {}", kind, self.current().kind);
            Err(self.error(&msg))
        }
    }

    pub(crate) fn error(&self, msg: &str) -> ParseError {
        let span = self.current().span;
        ParseError {
            message: msg.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Operand {
        Operand::Field(vec![name.to_string()])
    }

    #[test]
    fn test_text_and_action() {
        let nodes = parse("Hello {{ .Name }}").expect("parse");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0], Node::Text("Hello ".to_string()));
        match &nodes[1] {
            Node::Action(p) => assert_eq!(p.commands[0].operands, vec![field("Name")]),
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_commands() {
        let nodes = parse(r#"{{ .Name | default "Guest" | upper }}"#).expect("parse");
        let Node::Action(p) = &nodes[0] else {
            panic!("expected action");
        };
        assert_eq!(p.commands.len(), 3);
        assert_eq!(
            p.commands[1].operands,
            vec![
                Operand::Function("default".to_string()),
                Operand::Literal(Value::String("Guest".to_string())),
            ]
        );
    }

    #[test]
    fn test_if_else_chain() {
        let nodes = parse("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").expect("parse");
        match &nodes[0] {
            Node::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[1].body, vec![Node::Text("b".to_string())]);
                assert_eq!(otherwise.as_deref(), Some(&[Node::Text("c".to_string())][..]));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_range_and_with_else() {
        let nodes = parse("{{range .Items}}{{.}}{{else}}none{{end}}{{with .X}}x{{end}}")
            .expect("parse");
        assert!(matches!(&nodes[0], Node::Range { otherwise: Some(_), .. }));
        assert!(matches!(&nodes[1], Node::With { otherwise: None, .. }));
    }

    #[test]
    fn test_nested_parens() {
        let nodes = parse(r#"{{ if and (eq .A 1) (not .B) }}y{{ end }}"#).expect("parse");
        let Node::If { branches, .. } = &nodes[0] else {
            panic!("expected if");
        };
        let ops = &branches[0].condition.commands[0].operands;
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[1], Operand::Nested(_)));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = parse("{{ shout .Name }}").unwrap_err();
        assert!(err.message.contains("shout"), "{}", err);
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("{{if .A}}unterminated").is_err());
        assert!(parse("{{end}}").is_err());
        assert!(parse("{{else}}").is_err());
        assert!(parse("{{range .A}}{{else if .B}}{{end}}").is_err());
        assert!(parse("{{ }}").is_err());
        assert!(parse("{{ .A .B }}").is_err());
        assert!(parse("{{ .A | .B }}").is_err());
        assert!(parse("{{ (upper .A }}").is_err());
    }

    #[test]
    fn test_lexer_error_position() {
        let err = parse("ok\n{{ \"open }}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }
}
