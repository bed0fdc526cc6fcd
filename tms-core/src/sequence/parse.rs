//! Parsing and validating rendered sequence numbers.

use super::format::{segments, FormatConfig, Segment, ALLOWED_SEPARATORS};
use super::render::luhn_check_digit;
use crate::error::SequenceError;
use serde::Serialize;

/// Components recovered from a rendered sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceComponents {
    pub original: String,
    pub prefix: String,
    pub business_unit_code: String,
    pub year: String,
    pub month: String,
    pub week: String,
    pub day: String,
    pub location_code: String,
    pub sequence: String,
    pub random_digits: String,
    pub check_digit: String,
}

fn invalid(reason: impl Into<String>) -> SequenceError {
    SequenceError::InvalidNumber {
        reason: reason.into(),
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn take(&mut self, width: usize, what: &str) -> Result<&'a str, SequenceError> {
        let end = self.pos + width;
        let piece = self.input.get(self.pos..end).ok_or_else(|| {
            invalid(format!(
                "{} of width {} overruns input at position {}",
                what, width, self.pos
            ))
        })?;
        self.pos = end;
        Ok(piece)
    }

    fn take_digits(&mut self, width: usize, what: &str) -> Result<String, SequenceError> {
        let piece = self.take(width, what)?;
        if !piece.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!("{} must be numeric, got {:?}", what, piece)));
        }
        Ok(piece.to_string())
    }

    fn take_exact(&mut self, expected: &str, what: &str) -> Result<String, SequenceError> {
        let piece = self.take(expected.len(), what)?;
        if piece != expected {
            return Err(invalid(format!(
                "{} mismatch: expected {:?}, got {:?}",
                what, expected, piece
            )));
        }
        Ok(piece.to_string())
    }

    fn consumed(&self) -> &'a str {
        &self.input[..self.pos]
    }

    fn finish(&self) -> Result<(), SequenceError> {
        if self.pos != self.input.len() {
            return Err(invalid(format!(
                "unexpected trailing characters {:?}",
                &self.input[self.pos..]
            )));
        }
        Ok(())
    }
}

fn verify_check(base: &str, digit: &str) -> Result<(), SequenceError> {
    let expected = luhn_check_digit(base);
    if digit != expected.to_string() {
        return Err(invalid(format!(
            "invalid check digit: expected {}, got {}",
            expected, digit
        )));
    }
    Ok(())
}

/// Reverse a render using the fixed component widths of `config`.
pub fn parse(encoded: &str, config: &FormatConfig) -> Result<SequenceComponents, SequenceError> {
    if encoded.is_empty() {
        return Err(invalid("sequence cannot be empty"));
    }
    if config.uses_custom_format() {
        parse_custom(encoded, config)
    } else {
        parse_standard(encoded, config)
    }
}

fn parse_standard(
    encoded: &str,
    config: &FormatConfig,
) -> Result<SequenceComponents, SequenceError> {
    let separator = config.separator();
    let stripped = if separator.is_empty() {
        encoded.to_string()
    } else {
        encoded.replace(separator, "")
    };

    let mut out = SequenceComponents {
        original: encoded.to_string(),
        ..SequenceComponents::default()
    };
    let mut cur = Cursor::new(&stripped);

    out.prefix = cur.take_exact(&config.prefix, "prefix")?;
    if config.has_business_unit_code() {
        out.business_unit_code = cur.take_exact(&config.business_unit_code, "business unit code")?;
    }
    if config.include_year {
        out.year = cur.take_digits(usize::from(config.year_digits), "year")?;
    }
    if config.include_week_number {
        out.week = cur.take_digits(2, "week")?;
    } else if config.include_month {
        out.month = cur.take_digits(2, "month")?;
    }
    if config.include_day {
        out.day = cur.take_digits(2, "day")?;
    }
    if config.has_location_code() {
        out.location_code = cur.take(config.location_code.len(), "location code")?.to_string();
    }
    out.sequence = cur.take_digits(usize::from(config.sequence_digits), "sequence")?;
    if config.has_random_digits() {
        out.random_digits =
            cur.take_digits(usize::from(config.random_digits_count), "random digits")?;
    }
    if config.include_check_digit {
        let base = cur.consumed();
        out.check_digit = cur.take_digits(1, "check digit")?;
        verify_check(base, &out.check_digit)?;
    }
    cur.finish()?;
    Ok(out)
}

fn parse_custom(encoded: &str, config: &FormatConfig) -> Result<SequenceComponents, SequenceError> {
    let mut out = SequenceComponents {
        original: encoded.to_string(),
        ..SequenceComponents::default()
    };
    let mut cur = Cursor::new(encoded);
    let mut check_pos: Option<usize> = None;

    for seg in segments(&config.custom_format) {
        match seg {
            Segment::Literal(text) => {
                cur.take_exact(&text, "literal")?;
            }
            Segment::Placeholder(p) => match p {
                'P' => out.prefix = cur.take_exact(&config.prefix, "prefix")?,
                'B' => {
                    out.business_unit_code =
                        cur.take_exact(&config.business_unit_code, "business unit code")?
                }
                'Y' => out.year = cur.take_digits(usize::from(config.year_digits), "year")?,
                'M' => out.month = cur.take_digits(2, "month")?,
                'W' => out.week = cur.take_digits(2, "week")?,
                'D' => out.day = cur.take_digits(2, "day")?,
                'L' => {
                    out.location_code =
                        cur.take(config.location_code.len(), "location code")?.to_string()
                }
                'S' => {
                    out.sequence =
                        cur.take_digits(usize::from(config.sequence_digits), "sequence")?
                }
                'R' => {
                    out.random_digits =
                        cur.take_digits(usize::from(config.random_digits_count), "random digits")?
                }
                'C' => {
                    check_pos = Some(cur.pos);
                    out.check_digit = cur.take_digits(1, "check digit")?;
                }
                _ => {}
            },
        }
    }
    cur.finish()?;

    if let Some(pos) = check_pos {
        let mut base = String::with_capacity(encoded.len());
        base.push_str(&encoded[..pos]);
        base.push_str(&encoded[pos + 1..]);
        verify_check(&base, &out.check_digit)?;
    }
    Ok(out)
}

/// True when `encoded` parses under `config` and any check digit matches.
pub fn validate(encoded: &str, config: &FormatConfig) -> bool {
    parse(encoded, config).is_ok()
}

/// Structural checks applied to a freshly rendered value.
///
/// Looser than [`parse`]: a counter that outgrew its zero-padded width still
/// passes, matching what the renderer emits.
pub fn verify_rendered(encoded: &str, config: &FormatConfig) -> Result<(), SequenceError> {
    if encoded.is_empty() {
        return Err(invalid("sequence cannot be empty"));
    }

    if config.uses_custom_format() {
        return Ok(());
    }

    if !encoded.starts_with(&config.prefix) {
        return Err(invalid(format!(
            "sequence should start with prefix {:?} but got {:?}",
            config.prefix, encoded
        )));
    }

    if !config.use_separators {
        for sep in ALLOWED_SEPARATORS.iter().copied().chain([" ", "|"]) {
            if encoded.contains(sep) {
                return Err(invalid(format!(
                    "sequence contains unexpected separator {:?}",
                    sep
                )));
            }
        }
    }

    let min = minimum_length(config);
    if encoded.len() < min {
        return Err(invalid(format!(
            "sequence length {} is less than expected minimum {}",
            encoded.len(),
            min
        )));
    }

    if config.include_check_digit {
        let base = &encoded[..encoded.len() - 1];
        let base = base.strip_suffix(config.separator()).unwrap_or(base);
        verify_check(base, &encoded[encoded.len() - 1..])?;
    }
    Ok(())
}

/// Shortest string a standard render can produce for `config`.
pub fn minimum_length(config: &FormatConfig) -> usize {
    let mut widths: Vec<usize> = vec![config.prefix.len()];
    if config.has_business_unit_code() {
        widths.push(config.business_unit_code.len());
    }
    if config.include_year {
        widths.push(usize::from(config.year_digits));
    }
    if config.include_week_number || config.include_month {
        widths.push(2);
    }
    if config.include_day {
        widths.push(2);
    }
    if config.has_location_code() {
        widths.push(config.location_code.len());
    }
    widths.push(usize::from(config.sequence_digits));
    if config.has_random_digits() {
        widths.push(usize::from(config.random_digits_count));
    }
    if config.include_check_digit {
        widths.push(1);
    }

    let separators = config.separator().len() * widths.len().saturating_sub(1);
    widths.iter().sum::<usize>() + separators
}

/// Strip display punctuation and upper-case a user-entered number.
pub fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '.'))
        .collect::<String>()
        .to_uppercase()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::format::SequenceKind;
    use crate::sequence::render::{render, RandomSource};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    struct Fixed(&'static str);

    impl RandomSource for Fixed {
        fn digits(&self, count: usize) -> String {
            self.0.chars().cycle().take(count).collect()
        }
    }

    #[test]
    fn test_parse_pro_number() {
        let cfg = FormatConfig::default_for(SequenceKind::ProNumber);
        let parts = parse("S2412121234987654", &cfg).unwrap();
        assert_eq!(parts.prefix, "S");
        assert_eq!(parts.year, "24");
        assert_eq!(parts.month, "12");
        assert_eq!(parts.location_code, "12");
        assert_eq!(parts.sequence, "1234");
        assert_eq!(parts.random_digits, "987654");
        assert_eq!(parts.check_digit, "");
    }

    #[test]
    fn test_invoice_check_digit() {
        let cfg = FormatConfig::default_for(SequenceKind::Invoice);
        assert!(validate("INV-2024-12-000123-6", &cfg));
        assert!(!validate("INV-2024-12-000123-5", &cfg));

        let parts = parse("INV-2024-12-000123-6", &cfg).unwrap();
        assert_eq!(parts.year, "2024");
        assert_eq!(parts.sequence, "000123");
        assert_eq!(parts.check_digit, "6");
    }

    #[test]
    fn test_parse_overrun_is_invalid_number() {
        let cfg = FormatConfig::default_for(SequenceKind::ProNumber);
        let err = parse("S2412", &cfg).unwrap_err();
        assert!(matches!(err, SequenceError::InvalidNumber { .. }));
    }

    #[test]
    fn test_parse_rejects_wrong_prefix_and_trailing() {
        let cfg = FormatConfig::default_for(SequenceKind::WorkOrder);
        assert!(parse("WO-24-01-000042", &cfg).is_ok());
        assert!(parse("XO-24-01-000042", &cfg).is_err());
        assert!(parse("WO-24-01-0000421", &cfg).is_err());
    }

    #[test]
    fn test_parse_custom_with_literal_and_check() {
        let cfg = FormatConfig {
            prefix: "X".to_string(),
            sequence_digits: 3,
            allow_custom_format: true,
            custom_format: "{P}{C}-{S}".to_string(),
            ..FormatConfig::default()
        };
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rendered = render(&cfg, 5, at, &Fixed("0")).unwrap();
        let parts = parse(&rendered, &cfg).unwrap();
        assert_eq!(parts.sequence, "005");
        assert_eq!(parts.prefix, "X");
    }

    #[test]
    fn test_verify_rendered_allows_wide_counter() {
        let cfg = FormatConfig::default_for(SequenceKind::WorkOrder);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rendered = render(&cfg, 1_234_567, at, &Fixed("0")).unwrap();
        assert!(verify_rendered(&rendered, &cfg).is_ok());
        assert!(parse(&rendered, &cfg).is_err());
    }

    #[test]
    fn test_verify_rendered_rejects_stray_separator() {
        let cfg = FormatConfig::default_for(SequenceKind::ProNumber);
        let err = verify_rendered("S24-12121234987654", &cfg).unwrap_err();
        assert!(err.to_string().contains("separator"));
    }

    #[test]
    fn test_minimum_length_counts_separators() {
        let cfg = FormatConfig::default_for(SequenceKind::Invoice);
        assert_eq!(minimum_length(&cfg), "INV-2024-12-000123-6".len());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("s-2412 12.1234"), "S2412121234");
    }

    fn arb_config() -> impl Strategy<Value = FormatConfig> {
        (
            "[A-Z]{1,4}",
            any::<bool>(),
            prop_oneof![Just(2u8), Just(3u8), Just(4u8)],
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            1u8..=8,
            proptest::option::of("[0-9]{1,3}"),
            proptest::option::of(1u8..=6),
            any::<bool>(),
            proptest::option::of(prop_oneof![Just("-"), Just("_"), Just("/")]),
        )
            .prop_map(
                |(prefix, year, yd, month, week, day, seq, loc, rand, check, sep)| FormatConfig {
                    prefix,
                    include_year: year,
                    year_digits: yd,
                    include_month: month,
                    include_week_number: week,
                    include_day: day,
                    sequence_digits: seq,
                    include_location_code: loc.is_some(),
                    location_code: loc.unwrap_or_default(),
                    include_random_digits: rand.is_some(),
                    random_digits_count: rand.unwrap_or(0),
                    include_check_digit: check,
                    use_separators: sep.is_some(),
                    separator_char: sep.unwrap_or("-").to_string(),
                    ..FormatConfig::default()
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_parse_recovers_sequence(cfg in arb_config(), n in 0i64..10_000_000, day in 0i64..20_000) {
            let at = Utc.timestamp_opt(day * 86_400, 0).unwrap();
            let limit = 10i64.pow(u32::from(cfg.sequence_digits));
            let n = n % limit;
            let rendered = render(&cfg, n, at, &Fixed("31415")).unwrap();
            let parts = parse(&rendered, &cfg).unwrap();
            prop_assert_eq!(
                parts.sequence,
                format!("{:0w$}", n, w = usize::from(cfg.sequence_digits))
            );
            prop_assert!(verify_rendered(&rendered, &cfg).is_ok());
        }

        #[test]
        fn prop_check_digit_law(base in arb_config(), n in 0i64..1000) {
            let mut cfg = base;
            cfg.include_check_digit = true;
            cfg.sequence_digits = cfg.sequence_digits.max(3);
            let at = Utc.with_ymd_and_hms(2024, 12, 15, 0, 0, 0).unwrap();
            let rendered = render(&cfg, n, at, &Fixed("27")).unwrap();
            prop_assert!(validate(&rendered, &cfg));
        }
    }
}
