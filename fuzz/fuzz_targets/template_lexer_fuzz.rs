//! Fuzz target for the email template lexer.
//!
//! Arbitrary input must tokenize without panicking, and the token stream
//! always ends in exactly one `Eof`.
//!
//! Run with: cargo +nightly fuzz run template_lexer_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tms_template::lexer::{Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let tokens = Lexer::new(input).tokenize();
        assert!(matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)));
        let eofs = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Eof))
            .count();
        assert_eq!(eofs, 1);
    }
});
