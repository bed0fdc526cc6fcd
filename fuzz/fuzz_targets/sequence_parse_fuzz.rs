//! Fuzz target for sequence number parsing.
//!
//! Arbitrary input against each default format must parse or fail cleanly,
//! and `validate` must agree with `parse`.
//!
//! Run with: cargo +nightly fuzz run sequence_parse_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tms_core::sequence::{normalize, parse, validate, FormatConfig, SequenceKind};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = normalize(input);
        for kind in SequenceKind::ALL {
            let config = FormatConfig::default_for(kind);
            let parsed = parse(input, &config);
            if validate(input, &config) {
                assert!(parsed.is_ok());
            }
        }
    }
});
