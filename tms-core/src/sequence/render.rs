//! Rendering counters into formatted sequence numbers.

use super::format::{segments, FormatConfig, Segment};
use crate::error::SequenceError;
use chrono::{DateTime, Datelike, Utc};
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of random digits for the random component.
pub trait RandomSource: Send + Sync {
    /// Return `count` decimal digits.
    fn digits(&self, count: usize) -> String;
}

/// Operating-system RNG with a time-based fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

// Draws above this bound are redrawn so each digit is equally likely.
const DIGIT_REJECT_ABOVE: u32 = u32::MAX - (u32::MAX % 10) - 1;

impl OsRandom {
    fn os_digit() -> Result<u8, String> {
        loop {
            let v = OsRng.try_next_u32().map_err(|e| e.to_string())?;
            if v <= DIGIT_REJECT_ABOVE {
                return Ok((v % 10) as u8);
            }
        }
    }
}

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fallback_digit() -> u8 {
    let nanos = u64::from(Utc::now().timestamp_subsec_nanos());
    let bump = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    // splitmix64 finalizer over time and a process counter
    let mut z = nanos.wrapping_add(bump.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ((z ^ (z >> 31)) % 10) as u8
}

impl RandomSource for OsRandom {
    fn digits(&self, count: usize) -> String {
        let mut out = String::with_capacity(count);
        let mut warned = false;
        for _ in 0..count {
            let d = match Self::os_digit() {
                Ok(d) => d,
                Err(e) => {
                    if !warned {
                        tracing::warn!(error = %e, "OS random source failed, using time-based fallback");
                        warned = true;
                    }
                    fallback_digit()
                }
            };
            out.push(char::from(b'0' + d));
        }
        out
    }
}

/// Luhn check digit over the decimal digits in `input`.
///
/// Non-digit characters are ignored. Scanning right to left, the rightmost
/// digit is taken as-is and every second digit after it is doubled.
pub fn luhn_check_digit(input: &str) -> u8 {
    let sum: u32 = input
        .chars()
        .filter_map(|c| c.to_digit(10))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .enumerate()
        .map(|(idx, d)| {
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

/// Year formatted to the configured width.
pub(crate) fn year_string(year: i32, digits: u8) -> String {
    match digits {
        2 => format!("{:02}", year.rem_euclid(100)),
        4 => format!("{:04}", year),
        n => {
            let full = year.to_string();
            let n = usize::from(n);
            if n >= full.len() {
                full
            } else {
                full[full.len() - n..].to_string()
            }
        }
    }
}

fn counter_string(counter: i64, digits: u8) -> String {
    format!("{:0width$}", counter, width = usize::from(digits))
}

/// Render a counter with the given format at time `at`.
pub fn render(
    config: &FormatConfig,
    counter: i64,
    at: DateTime<Utc>,
    rng: &dyn RandomSource,
) -> Result<String, SequenceError> {
    config.validate()?;

    if counter < 0 {
        return Err(SequenceError::InvalidNumber {
            reason: format!("counter must be non-negative, got {}", counter),
        });
    }

    if config.uses_custom_format() {
        Ok(render_custom(config, counter, at, rng))
    } else {
        Ok(render_standard(config, counter, at, rng))
    }
}

fn render_standard(
    config: &FormatConfig,
    counter: i64,
    at: DateTime<Utc>,
    rng: &dyn RandomSource,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(10);

    parts.push(config.prefix.clone());
    if config.has_business_unit_code() {
        parts.push(config.business_unit_code.clone());
    }
    if config.include_year {
        parts.push(year_string(at.year(), config.year_digits));
    }
    if config.include_week_number {
        parts.push(format!("{:02}", at.iso_week().week()));
    } else if config.include_month {
        parts.push(format!("{:02}", at.month()));
    }
    if config.include_day {
        parts.push(format!("{:02}", at.day()));
    }
    if config.has_location_code() {
        parts.push(config.location_code.clone());
    }
    parts.push(counter_string(counter, config.sequence_digits));
    if config.has_random_digits() {
        parts.push(rng.digits(usize::from(config.random_digits_count)));
    }

    let separator = config.separator();
    let mut result = parts.join(separator);

    if config.include_check_digit {
        let check = luhn_check_digit(&result);
        result.push_str(separator);
        result.push(char::from(b'0' + check));
    }
    result
}

fn render_custom(
    config: &FormatConfig,
    counter: i64,
    at: DateTime<Utc>,
    rng: &dyn RandomSource,
) -> String {
    let mut out = String::new();
    let mut check_at: Option<usize> = None;

    for seg in segments(&config.custom_format) {
        match seg {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Placeholder(p) => match p {
                'P' => out.push_str(&config.prefix),
                'B' => out.push_str(&config.business_unit_code),
                'Y' => out.push_str(&year_string(at.year(), config.year_digits)),
                'M' => out.push_str(&format!("{:02}", at.month())),
                'W' => out.push_str(&format!("{:02}", at.iso_week().week())),
                'D' => out.push_str(&format!("{:02}", at.day())),
                'L' => out.push_str(&config.location_code),
                'S' => out.push_str(&counter_string(counter, config.sequence_digits)),
                'R' => out.push_str(&rng.digits(usize::from(config.random_digits_count))),
                'C' => check_at = Some(out.len()),
                _ => {}
            },
        }
    }

    if let Some(pos) = check_at {
        let check = luhn_check_digit(&out);
        out.insert(pos, char::from(b'0' + check));
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::format::SequenceKind;
    use chrono::TimeZone;

    struct Zeros;

    impl RandomSource for Zeros {
        fn digits(&self, count: usize) -> String {
            "0".repeat(count)
        }
    }

    fn dec_15_2024() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_luhn_reference_value() {
        assert_eq!(luhn_check_digit("INV-2024-12-000123"), 6);
        assert_eq!(luhn_check_digit(""), 0);
    }

    #[test]
    fn test_year_string_widths() {
        assert_eq!(year_string(2024, 2), "24");
        assert_eq!(year_string(2005, 2), "05");
        assert_eq!(year_string(2024, 4), "2024");
        assert_eq!(year_string(2024, 3), "024");
    }

    #[test]
    fn test_pro_number_default_render() {
        let cfg = FormatConfig::default_for(SequenceKind::ProNumber);
        let out = render(&cfg, 1234, dec_15_2024(), &OsRandom).unwrap();
        assert_eq!(out.len(), "S24121234".len() + 6 + 2);
        assert!(out.starts_with("S2412121234"), "{out}");
        assert!(out[11..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_invoice_default_render() {
        let cfg = FormatConfig::default_for(SequenceKind::Invoice);
        let out = render(&cfg, 123, dec_15_2024(), &Zeros).unwrap();
        assert_eq!(out, "INV-2024-12-000123-6");
    }

    #[test]
    fn test_work_order_default_render() {
        let cfg = FormatConfig::default_for(SequenceKind::WorkOrder);
        let out = render(&cfg, 42, dec_15_2024(), &Zeros).unwrap();
        assert_eq!(out, "WO-24-01-000042");
    }

    #[test]
    fn test_week_wins_over_month() {
        let cfg = FormatConfig {
            prefix: "W".to_string(),
            include_year: true,
            year_digits: 2,
            include_month: true,
            include_week_number: true,
            include_day: true,
            sequence_digits: 3,
            ..FormatConfig::default()
        };
        // 2024-12-30 falls in ISO week 1 of 2025.
        let at = Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap();
        assert_eq!(render(&cfg, 7, at, &Zeros).unwrap(), "W240130007");
    }

    #[test]
    fn test_custom_format_with_check_digit() {
        let cfg = FormatConfig {
            prefix: "S".to_string(),
            include_year: true,
            year_digits: 2,
            sequence_digits: 4,
            location_code: "12".to_string(),
            random_digits_count: 2,
            allow_custom_format: true,
            custom_format: "{P}{Y}{M}{L}{S}{R}{C}".to_string(),
            ..FormatConfig::default()
        };
        let out = render(&cfg, 1234, dec_15_2024(), &Zeros).unwrap();
        let base = "S241212123400";
        let check = luhn_check_digit(base);
        assert_eq!(out, format!("{}{}", base, check));
    }

    #[test]
    fn test_custom_check_digit_in_middle() {
        let cfg = FormatConfig {
            prefix: "X".to_string(),
            sequence_digits: 3,
            allow_custom_format: true,
            custom_format: "{P}{C}-{S}".to_string(),
            ..FormatConfig::default()
        };
        let out = render(&cfg, 5, dec_15_2024(), &Zeros).unwrap();
        let check = luhn_check_digit("X-005");
        assert_eq!(out, format!("X{}-005", check));
    }

    #[test]
    fn test_render_rejects_invalid_config() {
        let cfg = FormatConfig::default();
        assert!(matches!(
            render(&cfg, 1, dec_15_2024(), &Zeros),
            Err(SequenceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_os_random_digits_are_digits() {
        let d = OsRandom.digits(32);
        assert_eq!(d.len(), 32);
        assert!(d.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_fallback_digits_in_range() {
        for _ in 0..100 {
            assert!(fallback_digit() < 10);
        }
    }
}
