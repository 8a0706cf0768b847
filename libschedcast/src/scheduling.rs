//! Schedule time parsing
//!
//! Accepts what people actually type when scheduling a post:
//! - Absolute: RFC 3339 (`2026-11-20T15:00:00Z`) or unix seconds
//! - Relative durations: "30m", "2h", "1d", "in 1 hour"
//! - Natural language: "tomorrow 9am", "next monday 10:00"
//!
//! All results are unix seconds. Whether the time lies in the future is the
//! store's call, not the parser's.

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedcastError};

/// Parse `input` relative to `now` (unix seconds).
pub fn parse_schedule(input: &str, now: i64) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SchedcastError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(timestamp) = parse_absolute(input) {
        return Ok(timestamp);
    }

    let relative = input.strip_prefix("in ").unwrap_or(input).trim();
    if let Ok(duration) = humantime::parse_duration(relative) {
        let secs = i64::try_from(duration.as_secs())
            .map_err(|_| SchedcastError::Validation("Duration out of range".to_string()))?;
        return now
            .checked_add(secs)
            .ok_or_else(|| SchedcastError::Validation("Duration out of range".to_string()));
    }

    let base = DateTime::from_timestamp(now, 0)
        .ok_or_else(|| SchedcastError::Validation(format!("Invalid reference time: {}", now)))?;
    chrono_english::parse_date_string(input, base, chrono_english::Dialect::Us)
        .map(|dt: DateTime<Utc>| dt.timestamp())
        .map_err(|_| {
            SchedcastError::Validation(format!("Could not parse schedule string: {}", input))
        })
}

/// RFC 3339 timestamp or plain unix seconds.
pub fn parse_absolute(input: &str) -> Result<i64> {
    let input = input.trim();
    if let Ok(seconds) = input.parse::<i64>() {
        return Ok(seconds);
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.timestamp())
        .map_err(|e| SchedcastError::Validation(format!("Invalid timestamp '{}': {}", input, e)))
}
