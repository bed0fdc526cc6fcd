//! Lexer for the template language

pub mod scanner;
pub mod token;

pub use scanner::*;
pub use token::*;
