// ⏰ Timestamp Recovery - When did the payment happen?
// Date header first, server receipt time second, otherwise nothing

use crate::payment::OccurredAt;
use crate::source::FullMessage;
use chrono::{DateTime, Local, TimeZone};

/// Fallback chain, first success wins. Never fabricates a date and never
/// fails: a malformed header just falls through.
pub fn resolve_timestamp(message: &FullMessage) -> Option<OccurredAt> {
    message
        .header("Date")
        .and_then(parse_date_header)
        .map(OccurredAt::Zoned)
        .or_else(|| message.internal_date.and_then(receipt_to_local))
}

/// RFC 2822 email date, tolerating a trailing `(UTC)`-style comment and
/// a day-of-week that disagrees with the date
pub fn parse_date_header(value: &str) -> Option<DateTime<chrono::FixedOffset>> {
    let trimmed = value.trim();
    let without_comment = match trimmed.rfind('(') {
        Some(pos) if trimmed.ends_with(')') => trimmed[..pos].trim_end(),
        _ => trimmed,
    };

    [trimmed, without_comment]
        .into_iter()
        .flat_map(|candidate| [candidate, strip_weekday(candidate)])
        .find_map(|candidate| DateTime::parse_from_rfc2822(candidate).ok())
}

// "Thu, 20 Mar ..." → "20 Mar ...": the weekday is optional in RFC 2822
fn strip_weekday(value: &str) -> &str {
    match value.split_once(',') {
        Some((day, rest)) if day.trim().chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => value,
    }
}

/// Milliseconds since epoch → naive local wall-clock time
pub fn receipt_to_local(millis: i64) -> Option<OccurredAt> {
    Local
        .timestamp_millis_opt(millis)
        .earliest()
        .map(|dt| OccurredAt::Local(dt.naive_local()))
}

// ============================================================================
// TESTS
// ============================================================================
