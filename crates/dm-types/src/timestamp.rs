//! Text codec for timestamps that travel outside a typed column:
//! reaction sub-records, SQLite TEXT columns and JSON payloads.
//!
//! Wire form is `YYYY-MM-DDTHH:MM:SS[.ffffff]` with no zone suffix. Values are
//! always interpreted as UTC. `encode` always writes six fractional digits so
//! encoded values sort lexically in chronological order. That only holds for
//! four-digit years; query bounds outside 0000..=9999 go through
//! `encode_upper_bound` / `encode_lower_bound` instead.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

const SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const SECONDS_LEN: usize = 19;
const MAX_FRACTION_DIGITS: usize = 6;
const FIRST_ENCODABLE: &str = "0000-01-01T00:00:00.000000";
const LAST_ENCODABLE: &str = "9999-12-31T23:59:59.999999";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed timestamp {input:?}: {reason}")]
pub struct TimestampError {
    pub input: String,
    pub reason: String,
}

impl TimestampError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Encode an instant in canonical form (microsecond precision, truncating).
/// Output only decodes and sorts correctly when `is_encodable(ts)`.
pub fn encode(ts: &DateTime<Utc>) -> String {
    ts.naive_utc().format(CANONICAL_FORMAT).to_string()
}

/// Whether `ts` has a four-digit year.
pub fn is_encodable(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Text for an exclusive upper bound (`column < bound`) over canonical
/// values. `None` means no stored value can reach `ts`.
///
/// Rounds up to the next microsecond, so a value stored at the truncated
/// instant still compares below the bound.
pub fn encode_upper_bound(ts: &DateTime<Utc>) -> Option<String> {
    let ceiled = match ts.nanosecond() % 1_000 {
        0 => *ts,
        rem => ts.checked_add_signed(chrono::Duration::nanoseconds(i64::from(1_000 - rem)))?,
    };

    match ceiled.year() {
        y if y > 9999 => None,
        y if y < 0 => Some(FIRST_ENCODABLE.to_string()),
        _ => Some(encode(&ceiled)),
    }
}

/// Text for an exclusive lower bound (`column > bound`) over canonical
/// values. `None` means every stored value is after `ts`.
pub fn encode_lower_bound(ts: &DateTime<Utc>) -> Option<String> {
    match ts.year() {
        y if y < 0 => None,
        y if y > 9999 => Some(LAST_ENCODABLE.to_string()),
        _ => Some(encode(ts)),
    }
}

/// Decode `YYYY-MM-DDTHH:MM:SS[.ffffff]` as a UTC instant.
pub fn decode(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (input, None),
    };

    check_shape(input, whole)?;

    let seconds = NaiveDateTime::parse_from_str(whole, SECONDS_FORMAT)
        .map_err(|e| TimestampError::new(input, e.to_string()))?;

    let micros = match fraction {
        Some(digits) => parse_fraction(input, digits)?,
        None => 0,
    };

    seconds
        .with_nanosecond(micros * 1_000)
        .map(|ndt| ndt.and_utc())
        .ok_or_else(|| TimestampError::new(input, "fractional seconds out of range"))
}

/// chrono accepts variable-width fields; the wire form does not.
fn check_shape(input: &str, whole: &str) -> Result<(), TimestampError> {
    if whole.len() != SECONDS_LEN {
        return Err(TimestampError::new(input, "expected YYYY-MM-DDTHH:MM:SS"));
    }

    let shape_ok = whole.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'T',
        13 | 16 => b == b':',
        _ => b.is_ascii_digit(),
    });

    if shape_ok {
        Ok(())
    } else {
        Err(TimestampError::new(input, "expected YYYY-MM-DDTHH:MM:SS"))
    }
}

fn parse_fraction(input: &str, digits: &str) -> Result<u32, TimestampError> {
    if digits.is_empty() || digits.len() > MAX_FRACTION_DIGITS {
        return Err(TimestampError::new(input, "expected 1 to 6 fractional digits"));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::new(input, "fractional seconds must be digits"));
    }

    let value: u32 = digits
        .parse()
        .map_err(|_| TimestampError::new(input, "fractional seconds must be digits"))?;
    let scale = 10u32.pow((MAX_FRACTION_DIGITS - digits.len()) as u32);
    Ok(value * scale)
}

/// `#[serde(with = "timestamp::serde_text")]` for `DateTime<Utc>` fields.
pub mod serde_text {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        if !super::is_encodable(ts) {
            return Err(serde::ser::Error::custom(format!("{ts} is outside years 0000-9999")));
        }
        serializer.serialize_str(&super::encode(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::decode(&raw).map_err(serde::de::Error::custom)
    }
}
