//! Primitive scan targets (bool, integers, floats).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::FromWire;

fn parse_str<'a>(bytes: &'a [u8]) -> Result<&'a str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

/// Decode the integer payload for any integer-family OID.
fn decode_integer_binary(oid_: Oid, bytes: &[u8]) -> Result<i64> {
    match oid_ {
        oid::INT2 => {
            let arr: [u8; 2] = bytes
                .try_into()
                .map_err(|_| Error::Decode(format!("invalid int2 length: {}", bytes.len())))?;
            Ok(i64::from(i16::from_be_bytes(arr)))
        }
        oid::INT4 => {
            let arr: [u8; 4] = bytes
                .try_into()
                .map_err(|_| Error::Decode(format!("invalid int4 length: {}", bytes.len())))?;
            Ok(i64::from(i32::from_be_bytes(arr)))
        }
        oid::INT8 => {
            let arr: [u8; 8] = bytes
                .try_into()
                .map_err(|_| Error::Decode(format!("invalid int8 length: {}", bytes.len())))?;
            Ok(i64::from_be_bytes(arr))
        }
        oid::OID => {
            let arr: [u8; 4] = bytes
                .try_into()
                .map_err(|_| Error::Decode(format!("invalid oid length: {}", bytes.len())))?;
            Ok(i64::from(u32::from_be_bytes(arr)))
        }
        _ => Err(Error::Decode(format!(
            "cannot decode oid {} as an integer",
            oid_
        ))),
    }
}

fn decode_integer_text(oid_: Oid, bytes: &[u8]) -> Result<i64> {
    if !matches!(oid_, oid::INT2 | oid::INT4 | oid::INT8 | oid::OID) {
        return Err(Error::Decode(format!(
            "cannot decode oid {} as an integer",
            oid_
        )));
    }
    parse_str(bytes)?
        .trim()
        .parse()
        .map_err(|e| Error::Decode(format!("invalid integer: {e}")))
}

/// Range-check a decoded integer against the scan target width.
fn narrow<T: TryFrom<i64>>(value: i64, target: &str) -> Result<T> {
    T::try_from(value)
        .map_err(|_| Error::Decode(format!("value {} out of range for {}", value, target)))
}

// === Boolean ===

impl FromWire<'_> for bool {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::BOOL {
            return Err(Error::Decode(format!("cannot decode oid {} as bool", oid_)));
        }
        match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(true),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::BOOL {
            return Err(Error::Decode(format!("cannot decode oid {} as bool", oid_)));
        }
        if bytes.len() != 1 {
            return Err(Error::Decode(format!(
                "invalid boolean length: {}",
                bytes.len()
            )));
        }
        Ok(bytes[0] != 0)
    }
}

// === Integers ===

impl FromWire<'_> for i16 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_text(oid_, bytes)?, "i16")
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_binary(oid_, bytes)?, "i16")
    }
}

impl FromWire<'_> for i32 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_text(oid_, bytes)?, "i32")
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_binary(oid_, bytes)?, "i32")
    }
}

impl FromWire<'_> for i64 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        decode_integer_text(oid_, bytes)
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        decode_integer_binary(oid_, bytes)
    }
}

impl FromWire<'_> for u32 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_text(oid_, bytes)?, "u32")
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        narrow(decode_integer_binary(oid_, bytes)?, "u32")
    }
}

// === Floats ===

impl FromWire<'_> for f32 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::FLOAT4 {
            return Err(Error::Decode(format!("cannot decode oid {} as f32", oid_)));
        }
        parse_str(bytes)?
            .trim()
            .parse()
            .map_err(|e| Error::Decode(format!("invalid f32: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::FLOAT4 {
            return Err(Error::Decode(format!("cannot decode oid {} as f32", oid_)));
        }
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid f32 length: {}", bytes.len())))?;
        Ok(f32::from_be_bytes(arr))
    }
}

impl FromWire<'_> for f64 {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid_, oid::FLOAT4 | oid::FLOAT8) {
            return Err(Error::Decode(format!("cannot decode oid {} as f64", oid_)));
        }
        parse_str(bytes)?
            .trim()
            .parse()
            .map_err(|e| Error::Decode(format!("invalid f64: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        match oid_ {
            oid::FLOAT4 => {
                let arr: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| Error::Decode(format!("invalid f32 length: {}", bytes.len())))?;
                Ok(f64::from(f32::from_be_bytes(arr)))
            }
            oid::FLOAT8 => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::Decode(format!("invalid f64 length: {}", bytes.len())))?;
                Ok(f64::from_be_bytes(arr))
            }
            _ => Err(Error::Decode(format!("cannot decode oid {} as f64", oid_))),
        }
    }
}
