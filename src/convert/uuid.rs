//! uuid scan target and parameter conversion (feature `with-uuid`).

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::types::value::Value;

use super::FromWire;

impl FromWire<'_> for Uuid {
    fn from_text(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::UUID {
            return Err(Error::Decode(format!("cannot decode oid {} as uuid", oid_)));
        }
        let text = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
        Uuid::parse_str(text).map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
    }

    fn from_binary(oid_: Oid, bytes: &[u8]) -> Result<Self> {
        if oid_ != oid::UUID {
            return Err(Error::Decode(format!("cannot decode oid {} as uuid", oid_)));
        }
        Uuid::from_slice(bytes).map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(*v.as_bytes())
    }
}
