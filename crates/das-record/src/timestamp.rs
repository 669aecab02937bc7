//! Epoch-seconds timestamps and their on-disk string forms.
//!
//! Archive files prefix each record with an ISO-8601 UTC timestamp in
//! `TIME_FORMAT`; daily-rotated filenames carry a `DATE_FORMAT` suffix.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Timestamp prefix written to (and parsed from) archive log lines.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Date suffix for daily-rotated filenames.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
#[error("unparseable timestamp {0:?}")]
pub struct ParseTimestampError(pub String);

/// Wall clock, as floating-point seconds since the epoch.
pub fn now() -> f64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    elapsed.as_secs_f64()
}

fn to_datetime(seconds: f64) -> DateTime<Utc> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

/// Render epoch seconds in `TIME_FORMAT`.
pub fn time_str(seconds: f64) -> String {
    to_datetime(seconds).format(TIME_FORMAT).to_string()
}

/// Render epoch seconds as a `DATE_FORMAT` date (UTC).
pub fn date_str(seconds: f64) -> String {
    to_datetime(seconds).format(DATE_FORMAT).to_string()
}

/// Parse a `TIME_FORMAT` (or, as a fallback, RFC 3339) timestamp into epoch
/// seconds.
pub fn parse_time_str(text: &str) -> Result<f64, ParseTimestampError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIME_FORMAT) {
        let utc = naive.and_utc();
        return Ok(utc.timestamp_micros() as f64 / 1_000_000.0);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|parsed| parsed.timestamp_micros() as f64 / 1_000_000.0)
        .map_err(|_| ParseTimestampError(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_str_round_trips() {
        let ts = 1555468528.452;
        let parsed = parse_time_str(&time_str(ts)).unwrap();
        assert!((parsed - ts).abs() < 1e-6);
    }

    #[test]
    fn epoch_zero_formats_as_1970() {
        assert_eq!(time_str(0.0), "1970-01-01T00:00:00.000000Z");
        assert_eq!(date_str(0.0), "1970-01-01");
    }

    #[test]
    fn rfc3339_fallback_is_accepted() {
        let parsed = parse_time_str("2019-04-17T02:35:28.452+00:00").unwrap();
        assert!((parsed - 1555468528.452).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_time_str("not a timestamp").is_err());
        assert!(parse_time_str("").is_err());
    }
}
