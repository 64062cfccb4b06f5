//! Timestamp helpers and client-supplied date normalization.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::Deserialize;

/// Current time truncated to millisecond precision.
///
/// Clients compare against timestamps they received as epoch millis, so
/// sub-millisecond digits would make `since` filters re-deliver the message
/// a client already holds.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::InvalidTimestamp(format!("{} is out of range", millis)))
}

/// A date as supplied by a client: epoch millis or a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SinceDate {
    Millis(i64),
    Text(String),
}

impl SinceDate {
    /// Normalize to a UTC timestamp.
    ///
    /// Text accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as
    /// UTC), a bare `YYYY-MM-DD` (midnight UTC), or epoch millis as digits.
    pub fn to_timestamp(&self) -> Result<DateTime<Utc>> {
        match self {
            SinceDate::Millis(millis) => from_millis(*millis),
            SinceDate::Text(text) => parse_date_text(text.trim()),
        }
    }
}

fn parse_date_text(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(millis) = text.parse::<i64>() {
        return from_millis(millis);
    }
    Err(Error::InvalidTimestamp(format!("unrecognized date '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN_1_2024_MS: i64 = 1_704_067_200_000;

    #[test]
    fn test_millis() {
        let ts = SinceDate::Millis(JAN_1_2024_MS).to_timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), JAN_1_2024_MS);
    }

    #[test]
    fn test_text_formats() {
        let cases = [
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:00:00.000Z",
            "2024-01-01T01:00:00+01:00",
            "2024-01-01T00:00:00",
            "2024-01-01",
            "1704067200000",
        ];
        for case in cases {
            let ts = SinceDate::Text(case.to_string()).to_timestamp().unwrap();
            assert_eq!(ts.timestamp_millis(), JAN_1_2024_MS, "case {}", case);
        }
    }

    #[test]
    fn test_invalid_text() {
        let err = SinceDate::Text("yesterday".to_string()).to_timestamp();
        assert!(matches!(err, Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn test_out_of_range_millis() {
        assert!(from_millis(i64::MAX).is_err());
    }

    #[test]
    fn test_deserialize_untagged() {
        let n: SinceDate = serde_json::from_str("1704067200000").unwrap();
        assert_eq!(n, SinceDate::Millis(JAN_1_2024_MS));
        let s: SinceDate = serde_json::from_str("\"2024-01-01\"").unwrap();
        assert_eq!(s, SinceDate::Text("2024-01-01".to_string()));
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        let now = now_millis();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
