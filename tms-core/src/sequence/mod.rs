//! Sequence number formats
//!
//! Pure functions from `(format, counter, time)` to a rendered code and back:
//! - [`FormatConfig`]: declarative layout with per-kind defaults
//! - [`render`]: standard and custom-template rendering, Luhn check digit
//! - [`parse`] / [`validate`]: fixed-width component recovery

mod format;
mod parse;
mod render;

pub use format::{FormatConfig, SequenceKind, ALLOWED_SEPARATORS, CUSTOM_PLACEHOLDERS};
pub use parse::{minimum_length, normalize, parse, validate, verify_rendered, SequenceComponents};
pub use render::{luhn_check_digit, render, OsRandom, RandomSource};
