//! TMS Template - Email Template Language
//!
//! A small logic-light template language for email subjects and bodies:
//! `{{ .Field }}` interpolation, pipelines, `if`/`range`/`with` blocks and a
//! fixed function library. HTML bodies escape interpolated values; subjects
//! and plain-text bodies do not.
//!
//! ```text
//! source ─▶ lexer ─▶ tokens ─▶ parser ─▶ nodes ─▶ engine(data) ─▶ String
//! ```

pub mod engine;
pub mod funcs;
pub mod lexer;
pub mod parser;

pub use engine::{escape_html, CompiledEmail, Escape, Template, TemplateError};
pub use funcs::FUNCTIONS;
pub use parser::ParseError;

use tms_core::{EmailError, TmsError};

impl From<TemplateError> for TmsError {
    fn from(err: TemplateError) -> Self {
        TmsError::Email(EmailError::Template {
            reason: err.to_string(),
        })
    }
}
