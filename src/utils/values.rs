//! Field normalization for ambiguous raw values.
//!
//! Review payloads come from several API generations and from JSON-LD, so the
//! same logical field can arrive as a number, a localized numeric string, an
//! epoch in seconds or milliseconds, or a loosely-typed flag. These helpers
//! turn such values into canonical types and return `None` instead of failing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Epoch values below this magnitude are seconds, at or above it milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Naive datetime layouts tried after the zoned formats, interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

/// Date-only layouts, interpreted as UTC midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// A parsed instant in both canonical representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDate {
    /// ISO-8601 with millisecond precision and `Z` suffix.
    pub iso: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl ParsedDate {
    fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            iso: dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            timestamp_ms: dt.timestamp_millis(),
        }
    }
}

/// Parse a number that may carry locale-specific separators.
///
/// Everything except digits, `.`, `,` and `-` is stripped. When both
/// separators appear the later one is the decimal separator; a lone comma is
/// a decimal comma.
pub fn get_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number_str(s),
        _ => None,
    }
}

/// String form of [`get_number`].
pub fn parse_number_str(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replacen(',', ".", 1),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replacen(',', ".", 1),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a non-negative count, rounding fractional values.
pub fn get_count(value: &Value) -> Option<u64> {
    get_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n.round() as u64)
}

/// Parse a date given as epoch seconds, epoch milliseconds, or a date string.
pub fn parse_date(value: &Value) -> Option<ParsedDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(parse_epoch),
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

/// String form of [`parse_date`].
pub fn parse_date_str(raw: &str) -> Option<ParsedDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<f64>().ok().and_then(parse_epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(ParsedDate::from_datetime(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ParsedDate::from_datetime(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(ParsedDate::from_datetime(dt.with_timezone(&Utc)));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ParsedDate::from_datetime(naive.and_utc()));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| ParsedDate::from_datetime(naive.and_utc()));
        }
    }

    None
}

fn parse_epoch(value: f64) -> Option<ParsedDate> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value < EPOCH_MILLIS_THRESHOLD {
        value * 1000.0
    } else {
        value
    };
    DateTime::from_timestamp_millis(millis.trunc() as i64).map(ParsedDate::from_datetime)
}

/// Resolve a loosely-typed flag to true, false, or unknown (`None`).
pub fn parse_tri_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Loose truthiness for presence flags (`hasPhoto`, `image`).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(_) => true,
    }
}

/// Render a scalar as trimmed text, dropping blanks.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Trim a string and drop it if nothing is left.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
