//! Declarative sequence format configuration.

use crate::error::{FieldCode, MultiError, SequenceError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separators a format may declare.
pub const ALLOWED_SEPARATORS: &[&str] = &["-", "_", "/", "."];

/// Placeholders understood by custom formats.
pub const CUSTOM_PLACEHOLDERS: &[char] = &['P', 'B', 'Y', 'M', 'W', 'D', 'L', 'S', 'R', 'C'];

const MIN_DIGITS: u8 = 1;
const MAX_DIGITS: u8 = 10;

/// Sequence kinds with their own defaults and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    ProNumber,
    Consolidation,
    Invoice,
    WorkOrder,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 4] = [
        SequenceKind::ProNumber,
        SequenceKind::Consolidation,
        SequenceKind::Invoice,
        SequenceKind::WorkOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceKind::ProNumber => "pro_number",
            SequenceKind::Consolidation => "consolidation",
            SequenceKind::Invoice => "invoice",
            SequenceKind::WorkOrder => "work_order",
        }
    }

    /// Whether organizations may override the default format for this kind.
    pub fn supports_overrides(&self) -> bool {
        matches!(self, SequenceKind::ProNumber | SequenceKind::Consolidation)
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceKind {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pro_number" => Ok(SequenceKind::ProNumber),
            "consolidation" => Ok(SequenceKind::Consolidation),
            "invoice" => Ok(SequenceKind::Invoice),
            "work_order" => Ok(SequenceKind::WorkOrder),
            other => Err(SequenceError::InvalidSequenceType {
                kind: other.to_string(),
            }),
        }
    }
}

/// Format configuration driving rendered sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatConfig {
    pub prefix: String,
    pub include_year: bool,
    pub year_digits: u8,
    pub include_month: bool,
    pub include_week_number: bool,
    pub include_day: bool,
    pub sequence_digits: u8,
    pub include_location_code: bool,
    pub location_code: String,
    pub include_business_unit_code: bool,
    pub business_unit_code: String,
    pub include_random_digits: bool,
    pub random_digits_count: u8,
    pub include_check_digit: bool,
    pub use_separators: bool,
    pub separator_char: String,
    pub allow_custom_format: bool,
    pub custom_format: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            include_year: false,
            year_digits: 2,
            include_month: false,
            include_week_number: false,
            include_day: false,
            sequence_digits: 4,
            include_location_code: false,
            location_code: String::new(),
            include_business_unit_code: false,
            business_unit_code: String::new(),
            include_random_digits: false,
            random_digits_count: 0,
            include_check_digit: false,
            use_separators: false,
            separator_char: "-".to_string(),
            allow_custom_format: false,
            custom_format: String::new(),
        }
    }
}

impl FormatConfig {
    /// Built-in default for a kind.
    pub fn default_for(kind: SequenceKind) -> Self {
        match kind {
            SequenceKind::ProNumber => Self::freight_default("S"),
            SequenceKind::Consolidation => Self::freight_default("C"),
            SequenceKind::Invoice => Self {
                prefix: "INV".to_string(),
                include_year: true,
                year_digits: 4,
                include_month: true,
                sequence_digits: 6,
                include_check_digit: true,
                use_separators: true,
                separator_char: "-".to_string(),
                ..Self::default()
            },
            SequenceKind::WorkOrder => Self {
                prefix: "WO".to_string(),
                include_year: true,
                year_digits: 2,
                sequence_digits: 6,
                include_location_code: true,
                location_code: "01".to_string(),
                use_separators: true,
                separator_char: "-".to_string(),
                ..Self::default()
            },
        }
    }

    fn freight_default(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            include_year: true,
            year_digits: 2,
            include_month: true,
            sequence_digits: 4,
            include_location_code: true,
            location_code: "12".to_string(),
            include_random_digits: true,
            random_digits_count: 6,
            ..Self::default()
        }
    }

    /// True when a non-empty custom template replaces the standard layout.
    pub fn uses_custom_format(&self) -> bool {
        self.allow_custom_format && !self.custom_format.is_empty()
    }

    /// Separator actually inserted between standard components.
    pub fn separator(&self) -> &str {
        if self.use_separators {
            &self.separator_char
        } else {
            ""
        }
    }

    pub fn has_location_code(&self) -> bool {
        self.include_location_code && !self.location_code.is_empty()
    }

    pub fn has_business_unit_code(&self) -> bool {
        self.include_business_unit_code && !self.business_unit_code.is_empty()
    }

    pub fn has_random_digits(&self) -> bool {
        self.include_random_digits && self.random_digits_count > 0
    }

    /// Field-level validation of the configuration.
    pub fn check(&self) -> MultiError {
        let mut errs = MultiError::new();

        if self.prefix.trim().is_empty() {
            errs.add("prefix", FieldCode::Required, "Prefix is required");
        }

        if self.include_year && !(2..=4).contains(&self.year_digits) {
            errs.add(
                "yearDigits",
                FieldCode::OutOfRange,
                "Year digits must be 2, 3 or 4",
            );
        }

        if !(MIN_DIGITS..=MAX_DIGITS).contains(&self.sequence_digits) {
            errs.add(
                "sequenceDigits",
                FieldCode::OutOfRange,
                "Sequence digits must be between 1 and 10",
            );
        }

        if self.include_random_digits
            && !(MIN_DIGITS..=MAX_DIGITS).contains(&self.random_digits_count)
        {
            errs.add(
                "randomDigitsCount",
                FieldCode::OutOfRange,
                "Random digits count must be between 1 and 10",
            );
        }

        if self.use_separators && !ALLOWED_SEPARATORS.contains(&self.separator_char.as_str()) {
            errs.add(
                "separatorChar",
                FieldCode::Invalid,
                format!("Separator must be one of {:?}", ALLOWED_SEPARATORS),
            );
        }

        if self.include_location_code && self.location_code.is_empty() {
            errs.add(
                "locationCode",
                FieldCode::Required,
                "Location code is required when included",
            );
        }

        if self.include_business_unit_code && self.business_unit_code.is_empty() {
            errs.add(
                "businessUnitCode",
                FieldCode::Required,
                "Business unit code is required when included",
            );
        }

        // Parsing strips separators before splitting on fixed widths.
        let separator = self.separator();
        if !separator.is_empty() && !self.uses_custom_format() {
            for (field, value) in [
                ("prefix", &self.prefix),
                ("businessUnitCode", &self.business_unit_code),
                ("locationCode", &self.location_code),
            ] {
                if value.contains(separator) {
                    errs.add(
                        field,
                        FieldCode::InvalidFormat,
                        format!("Must not contain the separator '{}'", separator),
                    );
                }
            }
        }

        if self.uses_custom_format() {
            if let Err(reason) = check_custom_format(&self.custom_format) {
                errs.add("customFormat", FieldCode::InvalidFormat, reason);
            }
        }

        errs
    }

    /// Validate, collapsing failures into a sequence format error.
    pub fn validate(&self) -> Result<(), SequenceError> {
        self.check()
            .into_result()
            .map_err(|e| SequenceError::InvalidFormat {
                reason: e.to_string(),
            })
    }
}

/// One piece of a custom format template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Placeholder(char),
}

/// Split a custom format into literal text and `{X}` placeholders.
///
/// Unknown braces are kept as literal text.
pub(crate) fn segments(template: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{'
            && i + 2 < chars.len()
            && chars[i + 2] == '}'
            && CUSTOM_PLACEHOLDERS.contains(&chars[i + 1])
        {
            if !literal.is_empty() {
                out.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            out.push(Segment::Placeholder(chars[i + 1]));
            i += 3;
        } else {
            literal.push(chars[i]);
            i += 1;
        }
    }
    if !literal.is_empty() {
        out.push(Segment::Literal(literal));
    }
    out
}

fn check_custom_format(template: &str) -> Result<(), String> {
    let segs = segments(template);
    if !segs.contains(&Segment::Placeholder('S')) {
        return Err("Custom format must contain the {S} placeholder".to_string());
    }
    let checks = segs
        .iter()
        .filter(|s| **s == Segment::Placeholder('C'))
        .count();
    if checks > 1 {
        return Err("Custom format may contain at most one {C} placeholder".to_string());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
