//! String scan targets.
//!
//! Strings accept any OID: unknown types fall through to a generic string
//! target in text format, matching the registry's raw-string fallback.

use crate::error::{Error, Result};
use crate::protocol::types::Oid;

use super::FromWire;

impl<'a> FromWire<'a> for &'a str {
    fn from_text(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    }

    fn from_binary(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    }
}

impl FromWire<'_> for String {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&str>::from_text(oid, bytes).map(str::to_string)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&str>::from_binary(oid, bytes).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn any_oid_accepted() {
        assert_eq!(String::from_text(oid::TEXT, b"hello").unwrap(), "hello");
        assert_eq!(String::from_text(99_999, b"mystery").unwrap(), "mystery");
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(String::from_text(oid::TEXT, &[0xFF, 0xFE]).is_err());
    }
}
