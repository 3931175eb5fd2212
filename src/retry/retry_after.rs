//! `Retry-After` header parsing.
//!
//! The header carries either a non-negative number of seconds or an
//! HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`). Both forms become a
//! delay relative to the current time.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Lower-case header name, matched case-insensitively by transports.
pub const RETRY_AFTER: &str = "retry-after";

/// Parse a `Retry-After` value relative to the current time.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// Parse a `Retry-After` value relative to `now`.
///
/// Dates in the past yield a zero delay. Anything that is neither an
/// integer nor an HTTP-date yields `None`.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // IMF-fixdate is a subset of RFC 2822, including the literal "GMT" zone.
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
