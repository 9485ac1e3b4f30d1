//! Built-in codecs for the standard catalog types.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, oid};

use super::datetime;
use super::numeric::Numeric;
use super::value::Value;
use super::{Codec, TypeRegistry};

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {} length: {}", what, bytes.len())))
}

// === bool ===

fn bool_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(Value::Bool(true)),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(Value::Bool(false)),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        })),
        binary_decode: Some(Arc::new(|bytes| {
            let arr: [u8; 1] = fixed(bytes, "bool")?;
            Ok(Value::Bool(arr[0] != 0))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Bool(v) => {
                out.push(if *v { b't' } else { b'f' });
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-bool", oid::BOOL)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Bool(v) => {
                out.push(u8::from(*v));
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-bool", oid::BOOL)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === integers ===

/// The integer value of any integral `Value`, for width-checked encoding.
fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int2(v) => Some(i64::from(*v)),
        Value::Int4(v) => Some(i64::from(*v)),
        Value::Int8(v) => Some(*v),
        _ => None,
    }
}

fn int2_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse()
                .map(Value::Int2)
                .map_err(|e| Error::Decode(format!("invalid int2: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Int2(i16::from_be_bytes(fixed(bytes, "int2")?)))
        })),
        text_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT2))?;
            let v = i16::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "int2"))?;
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        })),
        binary_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT2))?;
            let v = i16::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "int2"))?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        })),
        preferred: FormatCode::Binary,
    }
}

fn int4_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse()
                .map(Value::Int4)
                .map_err(|e| Error::Decode(format!("invalid int4: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Int4(i32::from_be_bytes(fixed(bytes, "int4")?)))
        })),
        text_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT4))?;
            let v = i32::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "int4"))?;
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        })),
        binary_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT4))?;
            let v = i32::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "int4"))?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        })),
        preferred: FormatCode::Binary,
    }
}

fn int8_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse()
                .map(Value::Int8)
                .map_err(|e| Error::Decode(format!("invalid int8: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Int8(i64::from_be_bytes(fixed(bytes, "int8")?)))
        })),
        text_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT8))?;
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        })),
        binary_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::INT8))?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        })),
        preferred: FormatCode::Binary,
    }
}

fn oid_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse::<u32>()
                .map(|v| Value::Int8(i64::from(v)))
                .map_err(|e| Error::Decode(format!("invalid oid: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            let v = u32::from_be_bytes(fixed(bytes, "oid")?);
            Ok(Value::Int8(i64::from(v)))
        })),
        text_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::OID))?;
            let v = u32::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "oid"))?;
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        })),
        binary_encode: Some(Arc::new(|value, out| {
            let v = integral(value).ok_or_else(|| Error::type_mismatch("non-integer", oid::OID))?;
            let v = u32::try_from(v).map_err(|_| Error::overflow(&v.to_string(), "oid"))?;
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        })),
        preferred: FormatCode::Binary,
    }
}

// === floats ===

fn float_text(v: f64, out: &mut Vec<u8>) {
    if v.is_nan() {
        out.extend_from_slice(b"NaN");
    } else if v == f64::INFINITY {
        out.extend_from_slice(b"Infinity");
    } else if v == f64::NEG_INFINITY {
        out.extend_from_slice(b"-Infinity");
    } else {
        out.extend_from_slice(v.to_string().as_bytes());
    }
}

fn float4_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse()
                .map(Value::Float4)
                .map_err(|e| Error::Decode(format!("invalid float4: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Float4(f32::from_be_bytes(fixed(bytes, "float4")?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Float4(v) => {
                float_text(f64::from(*v), out);
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-float4", oid::FLOAT4)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Float4(v) => {
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-float4", oid::FLOAT4)),
        })),
        preferred: FormatCode::Binary,
    }
}

fn float8_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            utf8(bytes)?
                .trim()
                .parse()
                .map(Value::Float8)
                .map_err(|e| Error::Decode(format!("invalid float8: {e}")))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Float8(f64::from_be_bytes(fixed(bytes, "float8")?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Float8(v) => {
                float_text(*v, out);
                Ok(())
            }
            Value::Float4(v) => {
                float_text(f64::from(*v), out);
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-float8", oid::FLOAT8)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Float8(v) => {
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            Value::Float4(v) => {
                out.extend_from_slice(&f64::from(*v).to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-float8", oid::FLOAT8)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === text family ===

fn text_codec(target: crate::protocol::types::Oid) -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| Ok(Value::Text(utf8(bytes)?.to_string())))),
        binary_decode: Some(Arc::new(|bytes| Ok(Value::Text(utf8(bytes)?.to_string())))),
        text_encode: Some(Arc::new(move |value, out| match value {
            Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-text", target)),
        })),
        binary_encode: Some(Arc::new(move |value, out| match value {
            Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-text", target)),
        })),
        preferred: FormatCode::Binary,
    }
}

/// Enum values travel as their text labels in both formats.
pub(super) fn enum_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| Ok(Value::Text(utf8(bytes)?.to_string())))),
        binary_decode: Some(Arc::new(|bytes| Ok(Value::Text(utf8(bytes)?.to_string())))),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::Encode("enum value must be text".into())),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::Encode("enum value must be text".into())),
        })),
        preferred: FormatCode::Text,
    }
}

// === bytea ===

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

fn bytea_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            // Hex output format: \x followed by hex digits
            let Some(hex) = bytes.strip_prefix(b"\\x") else {
                return Err(Error::Decode("bytea text is not hex-encoded".into()));
            };
            if hex.len() % 2 != 0 {
                return Err(Error::Decode("invalid bytea hex length".into()));
            }
            let mut out = Vec::with_capacity(hex.len() / 2);
            for chunk in hex.chunks(2) {
                out.push((hex_digit(chunk[0])? << 4) | hex_digit(chunk[1])?);
            }
            Ok(Value::Bytea(out))
        })),
        binary_decode: Some(Arc::new(|bytes| Ok(Value::Bytea(bytes.to_vec())))),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Bytea(data) => {
                out.extend_from_slice(b"\\x");
                for b in data {
                    out.extend_from_slice(format!("{:02x}", b).as_bytes());
                }
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-bytea", oid::BYTEA)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Bytea(data) => {
                out.extend_from_slice(data);
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-bytea", oid::BYTEA)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === numeric ===

fn numeric_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            Numeric::from_text(utf8(bytes)?).map(Value::Numeric)
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Numeric::from_binary(bytes).map(Value::Numeric)
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Numeric(n) => {
                out.extend_from_slice(n.to_string().as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-numeric", oid::NUMERIC)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Numeric(n) => {
                n.to_binary(out);
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-numeric", oid::NUMERIC)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === temporal ===

fn date_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            let text = utf8(bytes)?;
            match text {
                "infinity" => Ok(Value::Date(i32::MAX)),
                "-infinity" => Ok(Value::Date(i32::MIN)),
                _ => datetime::parse_date(text).map(Value::Date),
            }
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Date(i32::from_be_bytes(fixed(bytes, "date")?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Date(i32::MAX) => {
                out.extend_from_slice(b"infinity");
                Ok(())
            }
            Value::Date(i32::MIN) => {
                out.extend_from_slice(b"-infinity");
                Ok(())
            }
            Value::Date(days) => {
                out.extend_from_slice(datetime::format_date(*days).as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-date", oid::DATE)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Date(days) => {
                out.extend_from_slice(&days.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-date", oid::DATE)),
        })),
        preferred: FormatCode::Binary,
    }
}

fn time_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            datetime::parse_time(utf8(bytes)?).map(Value::Time)
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Time(i64::from_be_bytes(fixed(bytes, "time")?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Time(micros) => {
                out.extend_from_slice(datetime::format_time(*micros).as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-time", oid::TIME)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Time(micros) => {
                out.extend_from_slice(&micros.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-time", oid::TIME)),
        })),
        preferred: FormatCode::Binary,
    }
}

fn timestamp_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            let text = utf8(bytes)?;
            match text {
                "infinity" => Ok(Value::Timestamp(i64::MAX)),
                "-infinity" => Ok(Value::Timestamp(i64::MIN)),
                _ => datetime::parse_timestamp(text).map(Value::Timestamp),
            }
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Timestamp(i64::from_be_bytes(fixed(
                bytes,
                "timestamp",
            )?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Timestamp(i64::MAX) => {
                out.extend_from_slice(b"infinity");
                Ok(())
            }
            Value::Timestamp(i64::MIN) => {
                out.extend_from_slice(b"-infinity");
                Ok(())
            }
            Value::Timestamp(micros) => {
                out.extend_from_slice(datetime::format_timestamp(*micros).as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-timestamp", oid::TIMESTAMP)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Timestamp(micros) => {
                out.extend_from_slice(&micros.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-timestamp", oid::TIMESTAMP)),
        })),
        preferred: FormatCode::Binary,
    }
}

fn timestamptz_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            let text = utf8(bytes)?;
            match text {
                "infinity" => Ok(Value::TimestampTz(i64::MAX)),
                "-infinity" => Ok(Value::TimestampTz(i64::MIN)),
                _ => datetime::parse_timestamptz(text).map(Value::TimestampTz),
            }
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::TimestampTz(i64::from_be_bytes(fixed(
                bytes,
                "timestamptz",
            )?)))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::TimestampTz(i64::MAX) => {
                out.extend_from_slice(b"infinity");
                Ok(())
            }
            Value::TimestampTz(i64::MIN) => {
                out.extend_from_slice(b"-infinity");
                Ok(())
            }
            Value::TimestampTz(micros) => {
                out.extend_from_slice(datetime::format_timestamptz(*micros).as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-timestamptz", oid::TIMESTAMPTZ)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::TimestampTz(micros) => {
                out.extend_from_slice(&micros.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-timestamptz", oid::TIMESTAMPTZ)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === uuid ===

fn uuid_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| {
            let text = utf8(bytes)?;
            let mut out = [0u8; 16];
            let mut idx = 0;
            let mut chars = text.bytes().filter(|&b| b != b'-');
            loop {
                let (Some(high), low) = (chars.next(), chars.next()) else {
                    break;
                };
                let low = low.ok_or_else(|| Error::Decode("invalid uuid length".into()))?;
                if idx >= 16 {
                    return Err(Error::Decode("invalid uuid length".into()));
                }
                out[idx] = (hex_digit(high)? << 4) | hex_digit(low)?;
                idx += 1;
            }
            if idx != 16 {
                return Err(Error::Decode("invalid uuid length".into()));
            }
            Ok(Value::Uuid(out))
        })),
        binary_decode: Some(Arc::new(|bytes| {
            Ok(Value::Uuid(fixed(bytes, "uuid")?))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Uuid(v) => {
                let mut text = String::with_capacity(36);
                for (i, b) in v.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        text.push('-');
                    }
                    text.push_str(&format!("{:02x}", b));
                }
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-uuid", oid::UUID)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Uuid(v) => {
                out.extend_from_slice(v);
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-uuid", oid::UUID)),
        })),
        preferred: FormatCode::Binary,
    }
}

// === json / jsonb ===

fn json_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| Ok(Value::Json(utf8(bytes)?.to_string())))),
        binary_decode: Some(Arc::new(|bytes| Ok(Value::Json(utf8(bytes)?.to_string())))),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Json(s) | Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-json", oid::JSON)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Json(s) | Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-json", oid::JSON)),
        })),
        preferred: FormatCode::Binary,
    }
}

fn jsonb_codec() -> Codec {
    Codec {
        text_decode: Some(Arc::new(|bytes| Ok(Value::Jsonb(utf8(bytes)?.to_string())))),
        binary_decode: Some(Arc::new(|bytes| {
            // jsonb binary payload is a version byte followed by the text
            let (version, rest) = bytes
                .split_first()
                .ok_or_else(|| Error::Decode("empty jsonb payload".into()))?;
            if *version != 1 {
                return Err(Error::Decode(format!("unknown jsonb version: {version}")));
            }
            Ok(Value::Jsonb(utf8(rest)?.to_string()))
        })),
        text_encode: Some(Arc::new(|value, out| match value {
            Value::Jsonb(s) | Value::Json(s) | Value::Text(s) => {
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-jsonb", oid::JSONB)),
        })),
        binary_encode: Some(Arc::new(|value, out| match value {
            Value::Jsonb(s) | Value::Json(s) | Value::Text(s) => {
                out.push(1);
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch("non-jsonb", oid::JSONB)),
        })),
        preferred: FormatCode::Binary,
    }
}

/// Install every built-in codec (and the built-in array containers).
pub(super) fn install(registry: &mut TypeRegistry) {
    registry.register(oid::BOOL, "bool", bool_codec());
    registry.register(oid::INT2, "int2", int2_codec());
    registry.register(oid::INT4, "int4", int4_codec());
    registry.register(oid::INT8, "int8", int8_codec());
    registry.register(oid::OID, "oid", oid_codec());
    registry.register(oid::FLOAT4, "float4", float4_codec());
    registry.register(oid::FLOAT8, "float8", float8_codec());
    registry.register(oid::TEXT, "text", text_codec(oid::TEXT));
    registry.register(oid::VARCHAR, "varchar", text_codec(oid::VARCHAR));
    registry.register(oid::BPCHAR, "bpchar", text_codec(oid::BPCHAR));
    registry.register(oid::NAME, "name", text_codec(oid::NAME));
    registry.register(oid::CHAR, "char", text_codec(oid::CHAR));
    registry.register(oid::XML, "xml", text_codec(oid::XML));
    registry.register(oid::UNKNOWN, "unknown", text_codec(oid::UNKNOWN));
    registry.register(oid::BYTEA, "bytea", bytea_codec());
    registry.register(oid::NUMERIC, "numeric", numeric_codec());
    registry.register(oid::DATE, "date", date_codec());
    registry.register(oid::TIME, "time", time_codec());
    registry.register(oid::TIMESTAMP, "timestamp", timestamp_codec());
    registry.register(oid::TIMESTAMPTZ, "timestamptz", timestamptz_codec());
    registry.register(oid::UUID, "uuid", uuid_codec());
    registry.register(oid::JSON, "json", json_codec());
    registry.register(oid::JSONB, "jsonb", jsonb_codec());

    // Friendlier aliases
    registry.register_name("boolean", oid::BOOL);
    registry.register_name("smallint", oid::INT2);
    registry.register_name("int", oid::INT4);
    registry.register_name("integer", oid::INT4);
    registry.register_name("bigint", oid::INT8);
    registry.register_name("real", oid::FLOAT4);
    registry.register_name("double precision", oid::FLOAT8);
    registry.register_name("character varying", oid::VARCHAR);

    // Array containers over the registered elements
    let arrays = [
        (oid::BOOL_ARRAY, "_bool", oid::BOOL),
        (oid::INT2_ARRAY, "_int2", oid::INT2),
        (oid::INT4_ARRAY, "_int4", oid::INT4),
        (oid::INT8_ARRAY, "_int8", oid::INT8),
        (oid::OID_ARRAY, "_oid", oid::OID),
        (oid::FLOAT4_ARRAY, "_float4", oid::FLOAT4),
        (oid::FLOAT8_ARRAY, "_float8", oid::FLOAT8),
        (oid::TEXT_ARRAY, "_text", oid::TEXT),
        (oid::VARCHAR_ARRAY, "_varchar", oid::VARCHAR),
        (oid::NAME_ARRAY, "_name", oid::NAME),
        (oid::BYTEA_ARRAY, "_bytea", oid::BYTEA),
        (oid::NUMERIC_ARRAY, "_numeric", oid::NUMERIC),
        (oid::DATE_ARRAY, "_date", oid::DATE),
        (oid::TIME_ARRAY, "_time", oid::TIME),
        (oid::TIMESTAMP_ARRAY, "_timestamp", oid::TIMESTAMP),
        (oid::TIMESTAMPTZ_ARRAY, "_timestamptz", oid::TIMESTAMPTZ),
        (oid::UUID_ARRAY, "_uuid", oid::UUID),
        (oid::JSONB_ARRAY, "_jsonb", oid::JSONB),
    ];
    for (array_oid, name, elem_oid) in arrays {
        // Elements registered just above; cannot fail
        let _ = registry.register_array(array_oid, name, elem_oid);
    }

    // Built-in range types
    let ranges = [
        (oid::INT4RANGE, "int4range", oid::INT4),
        (oid::INT8RANGE, "int8range", oid::INT8),
        (oid::NUMRANGE, "numrange", oid::NUMERIC),
        (oid::TSRANGE, "tsrange", oid::TIMESTAMP),
        (oid::TSTZRANGE, "tstzrange", oid::TIMESTAMPTZ),
        (oid::DATERANGE, "daterange", oid::DATE),
    ];
    for (range_oid, name, subtype_oid) in ranges {
        let _ = registry.register_range(range_oid, name, subtype_oid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::FormatCode;

    #[test]
    fn bytea_hex_text() {
        let registry = TypeRegistry::with_builtins();
        let decoded = registry
            .decode(oid::BYTEA, FormatCode::Text, Some(b"\\xDEADBEEF"))
            .unwrap();
        assert_eq!(decoded, Value::Bytea(vec![0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn uuid_text_round_trip() {
        let registry = TypeRegistry::with_builtins();
        let text = b"550e8400-e29b-41d4-a716-446655440000";
        let decoded = registry
            .decode(oid::UUID, FormatCode::Text, Some(text))
            .unwrap();

        let codec = registry.codec(oid::UUID).unwrap();
        let mut out = Vec::new();
        codec.text_encode.as_ref().unwrap()(&decoded, &mut out).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn uuid_rejects_bad_length() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry
            .decode(oid::UUID, FormatCode::Text, Some(b"550e8400"))
            .is_err());
    }

    #[test]
    fn jsonb_version_byte() {
        let registry = TypeRegistry::with_builtins();
        let decoded = registry
            .decode(oid::JSONB, FormatCode::Binary, Some(b"\x01{\"a\":1}"))
            .unwrap();
        assert_eq!(decoded, Value::Jsonb("{\"a\":1}".into()));

        let param = registry.encode_param(&decoded, oid::JSONB).unwrap();
        assert_eq!(param.data.as_deref(), Some(&b"\x01{\"a\":1}"[..]));
    }

    #[test]
    fn float_special_text_forms() {
        let registry = TypeRegistry::with_builtins();
        let codec = registry.codec(oid::FLOAT8).unwrap();

        let mut out = Vec::new();
        codec.text_encode.as_ref().unwrap()(&Value::Float8(f64::NAN), &mut out).unwrap();
        assert_eq!(out, b"NaN");

        out.clear();
        codec.text_encode.as_ref().unwrap()(&Value::Float8(f64::INFINITY), &mut out).unwrap();
        assert_eq!(out, b"Infinity");

        let decoded = registry
            .decode(oid::FLOAT8, FormatCode::Text, Some(b"-Infinity"))
            .unwrap();
        assert_eq!(decoded, Value::Float8(f64::NEG_INFINITY));
    }

    #[test]
    fn date_infinity_text() {
        let registry = TypeRegistry::with_builtins();
        let decoded = registry
            .decode(oid::DATE, FormatCode::Text, Some(b"infinity"))
            .unwrap();
        assert_eq!(decoded, Value::Date(i32::MAX));
    }

    #[test]
    fn bool_text_forms() {
        let registry = TypeRegistry::with_builtins();
        for (input, expected) in [(&b"t"[..], true), (b"true", true), (b"f", false)] {
            let decoded = registry
                .decode(oid::BOOL, FormatCode::Text, Some(input))
                .unwrap();
            assert_eq!(decoded, Value::Bool(expected));
        }
        assert!(registry
            .decode(oid::BOOL, FormatCode::Text, Some(b"maybe"))
            .is_err());
    }
}
