//! ErrorResponse and NoticeResponse messages.
//!
//! Both messages share the same layout: a sequence of one-byte field type
//! codes each followed by a NUL-terminated string, terminated by a zero byte.

use std::collections::HashMap;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::Cursor;

fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut msg = Cursor::new(payload);
    let mut fields = HashMap::new();

    loop {
        let field_type = msg
            .u8()
            .map_err(|_| Error::Protocol("error fields: missing terminator".into()))?;
        if field_type == 0 {
            break;
        }
        fields.insert(field_type, msg.cstr()?.to_string());
    }

    Ok(ServerError::new(fields))
}

/// ErrorResponse message.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    /// Convert into a crate error.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// NoticeResponse message.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_fields() {
        let payload = b"SERROR\0VERROR\0C23505\0Mduplicate key\0\0";
        let err = ErrorResponse::parse(payload).unwrap();
        assert_eq!(err.0.severity(), "ERROR");
        assert_eq!(err.0.code(), "23505");
        assert_eq!(err.0.message(), "duplicate key");
    }

    #[test]
    fn error_response_requires_terminator() {
        assert!(ErrorResponse::parse(b"SERROR\0").is_err());
    }

    #[test]
    fn empty_field_list() {
        let err = ErrorResponse::parse(b"\0").unwrap();
        assert_eq!(err.0.message(), "");
    }
}
