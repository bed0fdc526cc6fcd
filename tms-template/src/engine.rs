//! Template evaluation.
//!
//! Dot starts as the data root and is rebound by `range` and `with`; `$`
//! always refers to the root. A field that does not exist evaluates to a
//! missing value, which is an error only when printed.

use crate::funcs;
use crate::lexer::Span;
use crate::parser::{self, Command, Node, Operand, ParseError, Pipeline};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Output escaping applied to printed values. Literal template text is
/// never escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    #[default]
    None,
    Html,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: ParseError,
    },

    #[error("template {name}: line {line}, column {column}: {message}")]
    Execute {
        name: String,
        line: usize,
        column: usize,
        message: String,
    },
}

/// A parsed template ready to render.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        match parser::parse(source) {
            Ok(nodes) => Ok(Self { name, nodes }),
            Err(source) => Err(TemplateError::Parse { name, source }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, data: &Value, escape: Escape) -> Result<String, TemplateError> {
        self.render_at(data, escape, Utc::now())
    }

    /// Render with a fixed value for `now`.
    pub fn render_at(
        &self,
        data: &Value,
        escape: Escape,
        now: DateTime<Utc>,
    ) -> Result<String, TemplateError> {
        let mut exec = Exec {
            root: data,
            escape,
            now,
            out: String::new(),
        };
        exec.walk(&self.nodes, data)
            .map_err(|e| TemplateError::Execute {
                name: self.name.clone(),
                line: e.span.line,
                column: e.span.column,
                message: e.message,
            })?;
        Ok(exec.out)
    }
}

// ============================================================================
// EMAIL TEMPLATE SET
// ============================================================================

/// The subject, HTML and optional text templates of one email template.
#[derive(Debug, Clone)]
pub struct CompiledEmail {
    pub subject: Template,
    pub html: Template,
    pub text: Option<Template>,
}

impl CompiledEmail {
    /// Parse all parts; an empty text template is treated as absent.
    pub fn compile(subject: &str, html: &str, text: Option<&str>) -> Result<Self, TemplateError> {
        let text = match text {
            Some(source) if !source.is_empty() => Some(Template::parse("text", source)?),
            _ => None,
        };
        Ok(Self {
            subject: Template::parse("subject", subject)?,
            html: Template::parse("html", html)?,
            text,
        })
    }

    pub fn render_subject(&self, data: &Value) -> Result<String, TemplateError> {
        self.subject.render(data, Escape::None)
    }

    pub fn render_html(&self, data: &Value) -> Result<String, TemplateError> {
        self.html.render(data, Escape::Html)
    }

    /// Empty when there is no text template.
    pub fn render_text(&self, data: &Value) -> Result<String, TemplateError> {
        match &self.text {
            Some(text) => text.render(data, Escape::None),
            None => Ok(String::new()),
        }
    }
}

/// Escape `& < > " '` for inclusion in HTML text or attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    push_html_escaped(&mut out, s);
    out
}

fn push_html_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

// ============================================================================
// EVALUATOR
// ============================================================================

struct ExecError {
    span: Span,
    message: String,
}

impl ExecError {
    fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

struct Exec<'a> {
    root: &'a Value,
    escape: Escape,
    now: DateTime<Utc>,
    out: String,
}

impl Exec<'_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<(), ExecError> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Action(pipeline) => {
                    let Some(value) = self.eval_pipeline(pipeline, dot)? else {
                        return Err(ExecError::new(
                            pipeline.span,
                            format!("no value for {}", describe(pipeline)),
                        ));
                    };
                    let text = funcs::to_display(&value);
                    match self.escape {
                        Escape::Html => push_html_escaped(&mut self.out, &text),
                        Escape::None => self.out.push_str(&text),
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for branch in branches {
                        let value = self.eval_pipeline(&branch.condition, dot)?;
                        if funcs::is_truthy(value.as_ref()) {
                            self.walk(&branch.body, dot)?;
                            taken = true;
                            break;
                        }
                    }
                    if let (false, Some(otherwise)) = (taken, otherwise) {
                        self.walk(otherwise, dot)?;
                    }
                }
                Node::With {
                    pipeline,
                    body,
                    otherwise,
                } => match self.eval_pipeline(pipeline, dot)? {
                    Some(value) if funcs::is_truthy(Some(&value)) => self.walk(body, &value)?,
                    _ => {
                        if let Some(otherwise) = otherwise {
                            self.walk(otherwise, dot)?;
                        }
                    }
                },
                Node::Range {
                    pipeline,
                    body,
                    otherwise,
                } => {
                    let items = match self.eval_pipeline(pipeline, dot)? {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items,
                        Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
                        Some(other) => {
                            return Err(ExecError::new(
                                pipeline.span,
                                format!(
                                    "range can't iterate over {}",
                                    funcs::type_name(Some(&other))
                                ),
                            ))
                        }
                    };
                    if items.is_empty() {
                        if let Some(otherwise) = otherwise {
                            self.walk(otherwise, dot)?;
                        }
                    } else {
                        for item in &items {
                            self.walk(body, item)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, dot: &Value) -> Result<Option<Value>, ExecError> {
        let mut piped: Option<Option<Value>> = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, dot, piped)?);
        }
        Ok(piped.flatten())
    }

    fn eval_command(
        &self,
        command: &Command,
        dot: &Value,
        piped: Option<Option<Value>>,
    ) -> Result<Option<Value>, ExecError> {
        match command.operands.split_first() {
            Some((Operand::Function(name), rest)) => {
                let mut args = Vec::with_capacity(rest.len() + 1);
                for operand in rest {
                    args.push(self.eval_operand(operand, dot, command.span)?);
                }
                if let Some(value) = piped {
                    args.push(value);
                }
                funcs::call(name, args, self.now).map(Some).map_err(|e| {
                    ExecError::new(command.span, format!("error calling {}: {}", name, e))
                })
            }
            Some((operand, [])) => self.eval_operand(operand, dot, command.span),
            _ => Err(ExecError::new(command.span, "malformed command")),
        }
    }

    fn eval_operand(
        &self,
        operand: &Operand,
        dot: &Value,
        span: Span,
    ) -> Result<Option<Value>, ExecError> {
        match operand {
            Operand::Dot => Ok(Some(dot.clone())),
            Operand::Field(path) => lookup(dot, path, span),
            Operand::Root(path) => lookup(self.root, path, span),
            Operand::Literal(value) => Ok(Some(value.clone())),
            Operand::Nested(pipeline) => self.eval_pipeline(pipeline, dot),
            Operand::Function(name) => funcs::call(name, Vec::new(), self.now)
                .map(Some)
                .map_err(|e| ExecError::new(span, format!("error calling {}: {}", name, e))),
        }
    }
}

fn lookup(base: &Value, path: &[String], span: Span) -> Result<Option<Value>, ExecError> {
    let mut current = base;
    for key in path {
        current = match current {
            Value::Object(map) => match map.get(key) {
                Some(value) => value,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            other => {
                return Err(ExecError::new(
                    span,
                    format!(
                        "can't evaluate field {} in type {}",
                        key,
                        funcs::type_name(Some(other))
                    ),
                ))
            }
        };
    }
    Ok(Some(current.clone()))
}

fn describe(pipeline: &Pipeline) -> String {
    match pipeline.commands.as_slice() {
        [command] if command.operands.len() == 1 => command.operands[0].to_string(),
        _ => "pipeline".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn render(source: &str, data: Value) -> Result<String, TemplateError> {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        Template::parse("t", source)?.render_at(&data, Escape::None, now)
    }

    #[test]
    fn test_fields_and_nesting() {
        let data = json!({"Customer": {"Name": "Ann"}, "Total": 12.5});
        assert_eq!(
            render("{{.Customer.Name}} owes {{.Total}}", data).unwrap(),
            "Ann owes 12.5"
        );
    }

    #[test]
    fn test_missing_field_errors_when_printed() {
        let err = render("Hello {{ .Name }}", json!({})).unwrap_err();
        match err {
            TemplateError::Execute { message, line, .. } => {
                assert_eq!(message, "no value for .Name");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_accepted_by_default_and_empty() {
        assert_eq!(
            render(r#"{{ .Name | default "Guest" }}"#, json!({})).unwrap(),
            "Guest"
        );
        assert_eq!(
            render(r#"{{ if empty .Name }}none{{ end }}"#, json!({})).unwrap(),
            "none"
        );
        assert_eq!(render("{{ if .Flag }}y{{ else }}n{{ end }}", json!({})).unwrap(), "n");
    }

    #[test]
    fn test_present_null_prints_empty() {
        assert_eq!(render("[{{.X}}]", json!({"X": null})).unwrap(), "[]");
    }

    #[test]
    fn test_pipeline_and_functions() {
        let data = json!({"Name": "  acme corp "});
        assert_eq!(
            render("{{ .Name | trim | title }}", data.clone()).unwrap(),
            "Acme Corp"
        );
        assert_eq!(render("{{ upper (trim .Name) }}", data).unwrap(), "ACME CORP");
        assert_eq!(render("{{ formatDateTime now }}", json!({})).unwrap(), "March 9, 2024 at 2:05 PM");
    }

    #[test]
    fn test_if_else_chain() {
        let tpl = "{{if gt .N 10}}big{{else if gt .N 5}}mid{{else}}small{{end}}";
        assert_eq!(render(tpl, json!({"N": 11})).unwrap(), "big");
        assert_eq!(render(tpl, json!({"N": 6})).unwrap(), "mid");
        assert_eq!(render(tpl, json!({"N": 1})).unwrap(), "small");
    }

    #[test]
    fn test_range_rebinds_dot() {
        let data = json!({
            "Company": "Acme",
            "Items": [{"Name": "A", "Qty": 1}, {"Name": "B", "Qty": 2}]
        });
        assert_eq!(
            render(
                "{{range .Items}}{{.Name}}x{{.Qty}}@{{$.Company}};{{end}}",
                data
            )
            .unwrap(),
            "Ax1@Acme;Bx2@Acme;"
        );
        assert_eq!(
            render("{{range .Items}}x{{else}}empty{{end}}", json!({"Items": []})).unwrap(),
            "empty"
        );
        assert!(render("{{range .N}}{{end}}", json!({"N": "abc"})).is_err());
    }

    #[test]
    fn test_with_rebinds_dot() {
        let data = json!({"Addr": {"City": "Anytown"}});
        assert_eq!(render("{{with .Addr}}{{.City}}{{end}}", data).unwrap(), "Anytown");
        assert_eq!(
            render("{{with .Addr}}{{.City}}{{else}}no address{{end}}", json!({})).unwrap(),
            "no address"
        );
    }

    #[test]
    fn test_field_on_scalar_errors() {
        assert!(render("{{ .Name.First }}", json!({"Name": "Ann"})).is_err());
    }

    #[test]
    fn test_html_escaping_only_applies_to_values() {
        let tpl = Template::parse("html", "<p>{{ .Body }}</p>").unwrap();
        let out = tpl
            .render(&json!({"Body": "<script>alert('x') & \"y\"</script>"}), Escape::Html)
            .unwrap();
        assert_eq!(
            out,
            "<p>&lt;script&gt;alert(&#39;x&#39;) &amp; &#34;y&#34;&lt;/script&gt;</p>"
        );
    }

    #[test]
    fn test_compiled_email_parts() {
        let compiled = CompiledEmail::compile(
            "Order {{ .OrderNumber }}",
            "<b>{{ .CustomerName }}</b>",
            Some(""),
        )
        .unwrap();
        assert!(compiled.text.is_none());

        let data = json!({"OrderNumber": "ORD-1", "CustomerName": "A & B"});
        assert_eq!(compiled.render_subject(&data).unwrap(), "Order ORD-1");
        assert_eq!(compiled.render_html(&data).unwrap(), "<b>A &amp; B</b>");
        assert_eq!(compiled.render_text(&data).unwrap(), "");
    }

    #[test]
    fn test_compile_reports_failing_part() {
        let err = CompiledEmail::compile("ok", "{{ if .A }}", None).unwrap_err();
        assert!(matches!(err, TemplateError::Parse { ref name, .. } if name == "html"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_plain_text_renders_verbatim(text in "[^{}]{0,64}") {
            prop_assert_eq!(render(&text, json!({})).unwrap(), text);
        }

        #[test]
        fn prop_escaped_values_contain_no_markup(value in ".{0,32}") {
            let tpl = Template::parse("html", "{{ .V }}").unwrap();
            let out = tpl.render(&json!({"V": value}), Escape::Html).unwrap();
            prop_assert!(!out.contains('<') && !out.contains('>') && !out.contains('"'));
        }
    }
}
