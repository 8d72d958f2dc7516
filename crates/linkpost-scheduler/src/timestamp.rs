//! Timestamp parsing and the canonical stored encoding.
//!
//! Stored timestamps are RFC 3339 in UTC with a `+00:00` designator, with
//! whole seconds when the sub-second part is zero and microseconds
//! otherwise. Each instant therefore has exactly one encoding, and because
//! `+` sorts before every digit, lexical order of encoded strings matches
//! chronological order. `fetch_due` relies on this to compare in SQL.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serializer;

use crate::ValidationError;

/// Formats accepted with an explicit numeric offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%z",
];

/// Formats without an offset; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Encode a timestamp in the canonical stored form.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    if at.timestamp_subsec_micros() == 0 {
        at.to_rfc3339_opts(SecondsFormat::Secs, false)
    } else {
        at.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// Serialize a timestamp in the canonical encoding.
pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*at))
}

/// Serialize an optional timestamp in the canonical encoding.
pub fn serialize_opt<S: Serializer>(
    at: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => serialize(at, serializer),
        None => serializer.serialize_none(),
    }
}

/// Decode a stored timestamp.
pub fn parse_stored(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

/// Parse a user-supplied run time.
///
/// Accepts a `Z` suffix, a numeric offset (with or without a colon), or no
/// offset at all, in which case the time is taken as UTC. Seconds and
/// fractional seconds are optional; a bare date means midnight UTC.
pub fn parse_run_at(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingRunAt);
    }

    let normalized = match trimmed.strip_suffix(['Z', 'z']) {
        Some(rest) => format!("{}+00:00", rest),
        None => trimmed.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(ValidationError::InvalidRunAt(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn normalized(input: &str) -> String {
        format_timestamp(parse_run_at(input).unwrap())
    }

    #[test]
    fn test_utc_designator_round_trip() {
        assert_eq!(normalized("2025-12-18T12:34:56Z"), "2025-12-18T12:34:56+00:00");
        assert_eq!(
            normalized("2025-12-18T12:34:56.000Z"),
            "2025-12-18T12:34:56+00:00"
        );
    }

    #[test]
    fn test_numeric_offsets_convert_to_utc() {
        assert_eq!(
            normalized("2025-12-18T14:34:56+02:00"),
            "2025-12-18T12:34:56+00:00"
        );
        assert_eq!(
            normalized("2025-12-18T07:04:56-0530"),
            "2025-12-18T12:34:56+00:00"
        );
        assert_eq!(normalized("2025-12-18T14:34+02:00"), "2025-12-18T12:34:00+00:00");
    }

    #[test]
    fn test_naive_is_utc() {
        assert_eq!(normalized("2025-12-18T12:34:56"), "2025-12-18T12:34:56+00:00");
        assert_eq!(normalized("2025-12-18T12:34"), "2025-12-18T12:34:00+00:00");
        assert_eq!(normalized("2025-12-18 12:34:56"), "2025-12-18T12:34:56+00:00");
        assert_eq!(normalized("  2025-12-18T12:34:56  "), "2025-12-18T12:34:56+00:00");
        assert_eq!(normalized("2025-12-18"), "2025-12-18T00:00:00+00:00");
    }

    #[test]
    fn test_fractional_seconds_kept_to_micros() {
        assert_eq!(
            normalized("2025-12-18T12:34:56.123456789Z"),
            "2025-12-18T12:34:56.123456+00:00"
        );
        assert_eq!(
            normalized("2025-12-18T12:34:56.5"),
            "2025-12-18T12:34:56.500000+00:00"
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(parse_run_at(""), Err(ValidationError::MissingRunAt));
        assert_eq!(parse_run_at("   "), Err(ValidationError::MissingRunAt));
        assert!(matches!(
            parse_run_at("tomorrow at noon"),
            Err(ValidationError::InvalidRunAt(_))
        ));
        assert!(matches!(
            parse_run_at("2025-13-40T12:00:00Z"),
            Err(ValidationError::InvalidRunAt(_))
        ));
    }

    #[test]
    fn test_parse_stored_round_trip() {
        let at =
            Utc.with_ymd_and_hms(2025, 12, 18, 12, 34, 56).unwrap() + Duration::microseconds(7);
        assert_eq!(parse_stored(&format_timestamp(at)).unwrap(), at);
    }

    proptest! {
        // Lexical order of encoded timestamps matches chronological order.
        #[test]
        fn encoding_preserves_order(
            a in 0i64..253_402_300_799_000_000,
            b in 0i64..253_402_300_799_000_000,
        ) {
            let ta = DateTime::from_timestamp_micros(a).unwrap();
            let tb = DateTime::from_timestamp_micros(b).unwrap();

            prop_assert_eq!(ta.cmp(&tb), format_timestamp(ta).cmp(&format_timestamp(tb)));
        }

        // Whole-second timestamps stay whole-second after normalization.
        #[test]
        fn whole_seconds_have_no_fraction(secs in 0i64..253_402_300_799) {
            let at = DateTime::from_timestamp(secs, 0).unwrap();
            let encoded = format_timestamp(at);

            prop_assert!(!encoded.contains('.'));
            prop_assert!(encoded.ends_with("+00:00"));
            prop_assert_eq!(parse_run_at(&encoded).unwrap(), at);
        }
    }
}
