//! Function library available inside templates.
//!
//! Arguments arrive as `Option<Value>`: `None` is a field that does not exist
//! in the data, which only `default` and `empty` accept without complaint.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// Every name callable from a template.
pub const FUNCTIONS: &[&str] = &[
    // Dates
    "formatDate",
    "formatDateTime",
    "now",
    // Strings
    "upper",
    "lower",
    "title",
    "trim",
    "contains",
    "hasPrefix",
    "hasSuffix",
    // Utility
    "default",
    "empty",
    "json",
    // Builtins
    "eq",
    "ne",
    "lt",
    "le",
    "gt",
    "ge",
    "and",
    "or",
    "not",
    "len",
    "index",
];

const DATE_FORMAT: &str = "%B %-d, %Y";
const DATE_TIME_FORMAT: &str = "%B %-d, %Y at %-I:%M %p";

pub fn is_defined(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

/// Invoke a library function.
pub fn call(name: &str, args: Vec<Option<Value>>, now: DateTime<Utc>) -> Result<Value, String> {
    match name {
        "formatDate" => {
            let [t] = arity::<1>(name, args)?;
            parse_time(t.as_ref()).map(|t| Value::String(t.format(DATE_FORMAT).to_string()))
        }
        "formatDateTime" => {
            let [t] = arity::<1>(name, args)?;
            parse_time(t.as_ref()).map(|t| Value::String(t.format(DATE_TIME_FORMAT).to_string()))
        }
        "now" => {
            let [] = arity::<0>(name, args)?;
            Ok(Value::String(
                now.to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
        }

        "upper" => string_fn(name, args, |s| s.to_uppercase()),
        "lower" => string_fn(name, args, |s| s.to_lowercase()),
        "title" => string_fn(name, args, title_case),
        "trim" => string_fn(name, args, |s| s.trim().to_string()),
        "contains" => string_pred(name, args, |s, sub| s.contains(sub)),
        "hasPrefix" => string_pred(name, args, |s, p| s.starts_with(p)),
        "hasSuffix" => string_pred(name, args, |s, p| s.ends_with(p)),

        "default" => {
            let [fallback, value] = arity::<2>(name, args)?;
            Ok(if is_empty(value.as_ref()) {
                fallback.unwrap_or(Value::Null)
            } else {
                value.unwrap_or(Value::Null)
            })
        }
        "empty" => {
            let [value] = arity::<1>(name, args)?;
            Ok(Value::Bool(is_empty(value.as_ref())))
        }
        "json" => {
            let [value] = arity::<1>(name, args)?;
            serde_json::to_string(&value.unwrap_or(Value::Null))
                .map(Value::String)
                .map_err(|e| e.to_string())
        }

        "eq" => {
            if args.len() < 2 {
                return Err(arity_error(name, "at least 2", args.len()));
            }
            let mut iter = args.into_iter().map(|a| a.unwrap_or(Value::Null));
            let first = iter.next().unwrap_or(Value::Null);
            Ok(Value::Bool(iter.any(|other| values_equal(&first, &other))))
        }
        "ne" => {
            let [a, b] = arity::<2>(name, args)?;
            Ok(Value::Bool(!values_equal(
                &a.unwrap_or(Value::Null),
                &b.unwrap_or(Value::Null),
            )))
        }
        "lt" => compare_fn(name, args, |o| o == Ordering::Less),
        "le" => compare_fn(name, args, |o| o != Ordering::Greater),
        "gt" => compare_fn(name, args, |o| o == Ordering::Greater),
        "ge" => compare_fn(name, args, |o| o != Ordering::Less),

        "and" => {
            if args.is_empty() {
                return Err(arity_error(name, "at least 1", 0));
            }
            let mut last = Value::Null;
            for arg in args {
                last = arg.unwrap_or(Value::Null);
                if !is_truthy(Some(&last)) {
                    break;
                }
            }
            Ok(last)
        }
        "or" => {
            if args.is_empty() {
                return Err(arity_error(name, "at least 1", 0));
            }
            let mut last = Value::Null;
            for arg in args {
                last = arg.unwrap_or(Value::Null);
                if is_truthy(Some(&last)) {
                    break;
                }
            }
            Ok(last)
        }
        "not" => {
            let [value] = arity::<1>(name, args)?;
            Ok(Value::Bool(!is_truthy(value.as_ref())))
        }
        "len" => {
            let [value] = arity::<1>(name, args)?;
            match value {
                Some(Value::String(s)) => Ok(Value::from(s.chars().count())),
                Some(Value::Array(a)) => Ok(Value::from(a.len())),
                Some(Value::Object(m)) => Ok(Value::from(m.len())),
                other => Err(format!("len of {}", type_name(other.as_ref()))),
            }
        }
        "index" => {
            if args.is_empty() {
                return Err(arity_error(name, "at least 1", 0));
            }
            let mut iter = args.into_iter();
            let mut current = iter.next().flatten().unwrap_or(Value::Null);
            for key in iter {
                current = index_value(current, key.unwrap_or(Value::Null))?;
            }
            Ok(current)
        }

        other => Err(format!("function {:?} not defined", other)),
    }
}

// ============================================================================
// VALUE SEMANTICS
// ============================================================================

/// Emptiness for `default`/`empty`: missing, null, blank strings and empty
/// collections. Numbers and booleans are never empty.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(m)) => m.is_empty(),
        Some(Value::Number(_)) | Some(Value::Bool(_)) => false,
    }
}

/// Truthiness for `if`, `with`, `and`, `or` and `not`.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
    }
}

/// Text form of a value when printed by an action.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
            (_, _, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing value",
        Some(Value::Null) => "nil",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "map",
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Result<Ordering, String> {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
                return Ok(i.cmp(&j));
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .ok_or_else(|| "numbers are not comparable".to_string()),
                _ => Err("numbers are not comparable".to_string()),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => Ok(x.cmp(y)),
        _ => Err(format!(
            "incompatible types for comparison: {} and {}",
            type_name(a),
            type_name(b)
        )),
    }
}

fn index_value(container: Value, key: Value) -> Result<Value, String> {
    match (container, key) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| format!("cannot index array with {}", n))?;
            let len = items.len();
            items
                .into_iter()
                .nth(i as usize)
                .ok_or_else(|| format!("index out of range: {} (length {})", i, len))
        }
        (Value::Object(mut map), Value::String(k)) => Ok(map.remove(&k).unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        (container, key) => Err(format!(
            "cannot index {} with {}",
            type_name(Some(&container)),
            type_name(Some(&key))
        )),
    }
}

/// Accepts RFC 3339 strings, `YYYY-MM-DD` dates and unix seconds.
fn parse_time(value: Option<&Value>) -> Result<DateTime<Utc>, String> {
    match value {
        Some(Value::String(s)) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(t.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .ok_or_else(|| format!("cannot parse {:?} as a time", s))
        }
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| format!("cannot use {} as a time", n)),
        other => Err(format!("expected a time, got {}", type_name(other))),
    }
}

/// Capitalize the first letter of each word, leaving the rest untouched.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        let is_word = c.is_alphanumeric() || c == '_' || c == '\'';
        if at_word_start && is_word {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word;
    }
    out
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn arity<const N: usize>(name: &str, args: Vec<Option<Value>>) -> Result<[Option<Value>; N], String> {
    let got = args.len();
    args.try_into()
        .map_err(|_| arity_error(name, &N.to_string(), got))
}

fn arity_error(name: &str, want: &str, got: usize) -> String {
    format!("wrong number of args for {}: want {} got {}", name, want, got)
}

fn expect_string(value: Option<Value>) -> Result<String, String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        other => Err(format!("expected string, got {}", type_name(other.as_ref()))),
    }
}

fn string_fn(
    name: &str,
    args: Vec<Option<Value>>,
    f: impl Fn(&str) -> String,
) -> Result<Value, String> {
    let [s] = arity::<1>(name, args)?;
    expect_string(s).map(|s| Value::String(f(&s)))
}

fn string_pred(
    name: &str,
    args: Vec<Option<Value>>,
    f: impl Fn(&str, &str) -> bool,
) -> Result<Value, String> {
    let [s, needle] = arity::<2>(name, args)?;
    let s = expect_string(s)?;
    let needle = expect_string(needle)?;
    Ok(Value::Bool(f(&s, &needle)))
}

fn compare_fn(
    name: &str,
    args: Vec<Option<Value>>,
    f: impl Fn(Ordering) -> bool,
) -> Result<Value, String> {
    let [a, b] = arity::<2>(name, args)?;
    compare(a.as_ref(), b.as_ref()).map(|o| Value::Bool(f(o)))
}

// ============================================================================
// TESTS
// ============================================================================
