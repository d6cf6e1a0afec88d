//! Common utilities and helper functions
//!
//! Instant parsing shared by the time source, the testing override and the
//! schedule file loader.

pub mod error;

use chrono::DateTime;
use serde_json::Value;

use error::TimeError;

/// Integers below this are read as epoch seconds rather than milliseconds
const EPOCH_SECONDS_CEILING: i64 = 100_000_000_000;

/// Parse an instant written as integer epoch ms or an RFC 3339 timestamp
pub fn parse_instant_text(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ms) = trimmed.parse::<i64>() {
        return Some(ms);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Interpret a JSON value as epoch milliseconds
///
/// Accepts integral numbers and strings understood by [`parse_instant_text`].
pub fn value_to_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => parse_instant_text(s),
        _ => None,
    }
}

/// Parse a time server response body into epoch milliseconds
///
/// Recognized forms:
/// - fractional epoch seconds (`1700000000.123`)
/// - integer epoch seconds or milliseconds
/// - RFC 3339 timestamps
/// - JSON objects with a numeric `epochMs` or `time` field
pub fn parse_time_body(body: &str) -> Result<i64, TimeError> {
    let trimmed = body.trim();

    if let Ok(int) = trimmed.parse::<i64>() {
        return Ok(if int.unsigned_abs() < EPOCH_SECONDS_CEILING.unsigned_abs() {
            int * 1000
        } else {
            int
        });
    }

    if let Ok(secs) = trimmed.parse::<f64>() {
        if secs.is_finite() {
            return Ok((secs * 1000.0).round() as i64);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(ms) = map.get("epochMs").and_then(value_to_epoch_ms) {
            return Ok(ms);
        }
        if let Some(ms) = map.get("time").and_then(value_to_epoch_ms) {
            return Ok(ms);
        }
    }

    Err(TimeError::malformed(truncate_text(trimmed, 64)))
}

/// Truncate text to a maximum length
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
