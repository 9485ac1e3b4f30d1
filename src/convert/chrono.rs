//! chrono scan targets and parameter conversions (feature `with-chrono`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::types::datetime::{MICROS_PER_DAY, PG_EPOCH_UNIX_MICROS};
use crate::types::value::Value;

use super::FromWire;

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid epoch date")
}

fn micros_to_naive(micros: i64) -> Result<NaiveDateTime> {
    let unix_micros = micros
        .checked_add(PG_EPOCH_UNIX_MICROS)
        .ok_or_else(|| Error::Decode("timestamp out of range".into()))?;
    DateTime::<Utc>::from_timestamp_micros(unix_micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::Decode("timestamp out of range".into()))
}

fn naive_to_micros(dt: &NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros() - PG_EPOCH_UNIX_MICROS
}

impl FromWire<'_> for NaiveDate {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::DATE {
            return Err(Error::Decode(format!("cannot decode oid {} as date", oid_)));
        }
        let text = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|e| Error::Decode(format!("invalid date: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::DATE {
            return Err(Error::Decode(format!("cannot decode oid {} as date", oid_)));
        }
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid date length: {}", bytes.len())))?;
        let days = i32::from_be_bytes(arr);
        pg_epoch_date()
            .checked_add_signed(TimeDelta::days(i64::from(days)))
            .ok_or_else(|| Error::Decode("date out of range".into()))
    }
}

impl FromWire<'_> for NaiveTime {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIME {
            return Err(Error::Decode(format!("cannot decode oid {} as time", oid_)));
        }
        let text = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
        NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .map_err(|e| Error::Decode(format!("invalid time: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIME {
            return Err(Error::Decode(format!("cannot decode oid {} as time", oid_)));
        }
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid time length: {}", bytes.len())))?;
        let micros = i64::from_be_bytes(arr);
        if !(0..MICROS_PER_DAY).contains(&micros) {
            return Err(Error::Decode(format!("time out of range: {micros}")));
        }
        let secs = (micros / 1_000_000) as u32;
        let micro = (micros % 1_000_000) as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, micro * 1000)
            .ok_or_else(|| Error::Decode("time out of range".into()))
    }
}

impl FromWire<'_> for NaiveDateTime {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIMESTAMP {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as timestamp",
                oid_
            )));
        }
        let text = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| Error::Decode(format!("invalid timestamp: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIMESTAMP {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as timestamp",
                oid_
            )));
        }
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid timestamp length: {}", bytes.len())))?;
        micros_to_naive(i64::from_be_bytes(arr))
    }
}

impl FromWire<'_> for DateTime<Utc> {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIMESTAMPTZ {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as timestamptz",
                oid_
            )));
        }
        let text = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
        DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Decode(format!("invalid timestamptz: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::TIMESTAMPTZ {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as timestamptz",
                oid_
            )));
        }
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid timestamptz length: {}", bytes.len())))?;
        micros_to_naive(i64::from_be_bytes(arr)).map(|dt| dt.and_utc())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        let days = v.signed_duration_since(pg_epoch_date()).num_days();
        Value::Date(days as i32)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        let micros = i64::from(v.num_seconds_from_midnight()) * 1_000_000
            + i64::from(v.nanosecond() / 1000);
        Value::Time(micros)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(naive_to_micros(&v))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::TimestampTz(v.timestamp_micros() - PG_EPOCH_UNIX_MICROS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_binary_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let Value::Date(days) = Value::from(date) else {
            panic!("expected date value");
        };
        let decoded = NaiveDate::from_binary(oid::DATE, &days.to_be_bytes()).unwrap();
        assert_eq!(decoded, date);
    }

    #[test]
    fn timestamp_binary_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2023, 7, 14)
            .unwrap()
            .and_hms_micro_opt(12, 30, 45, 123_456)
            .unwrap();
        let Value::Timestamp(micros) = Value::from(dt) else {
            panic!("expected timestamp value");
        };
        let decoded = NaiveDateTime::from_binary(oid::TIMESTAMP, &micros.to_be_bytes()).unwrap();
        assert_eq!(decoded, dt);
    }

    #[test]
    fn timestamptz_text_parse() {
        let decoded =
            DateTime::<Utc>::from_text(oid::TIMESTAMPTZ, b"2023-07-14 12:30:45.123456+02").unwrap();
        assert_eq!(
            decoded.naive_utc(),
            NaiveDate::from_ymd_opt(2023, 7, 14)
                .unwrap()
                .and_hms_micro_opt(10, 30, 45, 123_456)
                .unwrap()
        );
    }

    #[test]
    fn day_zero_is_pg_epoch() {
        assert_eq!(
            Value::from(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()),
            Value::Date(0)
        );
    }
}
