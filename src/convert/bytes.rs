//! Byte-sequence scan targets.

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::FromWire;

impl<'a> FromWire<'a> for &'a [u8] {
    /// Text-format results scanned into a byte target return the raw bytes.
    fn from_text(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        Ok(bytes)
    }

    fn from_binary(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        Ok(bytes)
    }
}

impl FromWire<'_> for Vec<u8> {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        // bytea text format is hex-encoded; other types pass through raw
        if oid_ == oid::BYTEA {
            let Some(hex) = bytes.strip_prefix(b"\\x") else {
                return Err(Error::Decode("bytea text is not hex-encoded".into()));
            };
            return decode_hex(hex);
        }
        Ok(bytes.to_vec())
    }

    fn from_binary(_oid: Oid, bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        result.push((hex_digit(chunk[0])? << 4) | hex_digit(chunk[1])?);
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytea_hex_text() {
        assert_eq!(
            Vec::<u8>::from_text(oid::BYTEA, b"\\xDEADBEEF").unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn other_text_passes_raw() {
        assert_eq!(Vec::<u8>::from_text(oid::TEXT, b"abc").unwrap(), b"abc");
    }

    #[test]
    fn binary_passthrough() {
        assert_eq!(
            Vec::<u8>::from_binary(oid::BYTEA, &[0, 1, 2]).unwrap(),
            vec![0, 1, 2]
        );
    }
}
