//! Value normalization and masking

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref DATE_PREFIX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap();
}

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Canonical form of a date-like string: `YYYY-MM-DD` for dates,
/// `YYYY-MM-DDTHH:MM:SS[.f]` for naive timestamps and RFC 3339 UTC for zoned ones
pub fn canonical_date(text: &str) -> Option<String> {
    let text = text.trim();
    if !DATE_PREFIX.is_match(text) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }
    // Postgres renders offsets as +00 without minutes
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Dates become canonical strings, nulls stay null, nested values become JSON text
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => match canonical_date(&s) {
            Some(date) => Value::String(date),
            None => Value::String(s),
        },
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other,
    }
}

/// Keeps the first and last two characters and stars the interior. Values shorter
/// than four characters are starred completely.
pub fn mask_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len < 4 {
        return "*".repeat(len);
    }
    let mut masked = String::with_capacity(text.len());
    masked.extend(&chars[..2]);
    masked.push_str(&"*".repeat(len - 4));
    masked.extend(&chars[len - 2..]);
    masked
}

pub fn mask_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(mask_text(s)),
        other => Value::String(mask_text(&other.to_string())),
    }
}
