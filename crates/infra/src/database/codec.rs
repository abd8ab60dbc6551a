//! Column encoding shared by the SQLite repositories

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct DecodeError(String);

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

pub(crate) fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        decode_failure(idx, Type::Integer, format!("timestamp out of range: {millis}"))
    })
}

pub(crate) fn opt_from_millis(
    idx: usize,
    millis: Option<i64>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| from_millis(idx, m)).transpose()
}

/// Parse a lower-case status column into its enum.
pub(crate) fn parse_text<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| decode_failure(idx, Type::Text, e))
}

pub(crate) fn parse_json<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(raw).map_err(|e| decode_failure(idx, Type::Text, e.to_string()))
}

pub(crate) fn to_u32(idx: usize, value: i64) -> rusqlite::Result<u32> {
    u32::try_from(value).map_err(|e| decode_failure(idx, Type::Integer, e.to_string()))
}

pub(crate) fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn count_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn decode_failure(idx: usize, ty: Type, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(DecodeError(message.into())))
}

#[cfg(test)]
mod tests {
    use mailsync_domain::TransmissionStatus;

    use super::*;

    #[test]
    fn millis_keep_sub_second_precision() {
        let at = DateTime::from_timestamp_millis(1_760_000_000_123).expect("valid");
        assert_eq!(from_millis(0, to_millis(at)).expect("decodes"), at);
        assert_eq!(opt_from_millis(0, None).expect("decodes"), None);
    }

    #[test]
    fn unknown_status_is_a_conversion_failure() {
        assert_eq!(
            parse_text::<TransmissionStatus>(3, "in_progress").expect("known"),
            TransmissionStatus::InProgress
        );
        let err = parse_text::<TransmissionStatus>(3, "exploded").expect_err("unknown");
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, Type::Text, _)));
    }
}
