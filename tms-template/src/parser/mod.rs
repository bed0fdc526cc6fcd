//! Parser for the template language

pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::*;
