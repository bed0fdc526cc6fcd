//! Fuzz target for the email template parser and evaluator.
//!
//! Parse errors carry a 1-based position, and anything that parses renders
//! against the preview sample data without panicking.
//!
//! Run with: cargo +nightly fuzz run template_parser_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tms_core::email::sample_data;
use tms_template::parser::parse;
use tms_template::{Escape, Template};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        match parse(input) {
            Ok(_) => {
                let template = Template::parse("fuzz", input).expect("parse is deterministic");
                let sample = sample_data();
                let _ = template.render(&sample, Escape::Html);
                let _ = template.render(&sample, Escape::None);
            }
            Err(err) => {
                assert!(err.line >= 1, "Error line should be >= 1");
                assert!(err.column >= 1, "Error column should be >= 1");
                assert!(!err.message.is_empty());
            }
        }
    }
});
