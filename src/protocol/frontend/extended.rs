//! Extended query protocol messages.

use crate::protocol::codec::{frame, put_bytes, put_cstr, put_i16, put_i32, put_u8};
use crate::protocol::types::{FormatCode, Oid};

/// One bound parameter, already encoded for the wire.
///
/// `data` is the raw payload for the chosen format; `None` means NULL and
/// is written as a -1 length with no payload.
#[derive(Debug, Clone)]
pub struct BindParam {
    /// Format the payload is encoded in
    pub format: FormatCode,
    /// Encoded payload, or `None` for NULL
    pub data: Option<Vec<u8>>,
}

impl BindParam {
    /// A NULL parameter (format code irrelevant, text by convention).
    pub fn null() -> Self {
        Self {
            format: FormatCode::Text,
            data: None,
        }
    }

    /// A text-format parameter.
    pub fn text(data: Vec<u8>) -> Self {
        Self {
            format: FormatCode::Text,
            data: Some(data),
        }
    }

    /// A binary-format parameter.
    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            format: FormatCode::Binary,
            data: Some(data),
        }
    }
}

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    frame(buf, super::msg_type::PARSE, |body| {
        put_cstr(body, name);
        put_cstr(body, query);
        put_i16(body, param_oids.len() as i16);
        for &oid in param_oids {
            put_i32(body, oid as i32);
        }
    });
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// - `portal`: Portal name (empty string for unnamed portal)
/// - `statement`: Statement name
/// - `params`: Encoded parameter values
/// - `result_formats`: Format codes requested for result columns; empty
///   means all-text, a single entry applies to every column
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[BindParam],
    result_formats: &[FormatCode],
) {
    frame(buf, super::msg_type::BIND, |body| {
        put_cstr(body, portal);
        put_cstr(body, statement);

        // Per-parameter format codes
        put_i16(body, params.len() as i16);
        for param in params {
            put_i16(body, param.format as i16);
        }

        // Parameter values: -1 length marks NULL, otherwise
        // length-prefixed payload
        put_i16(body, params.len() as i16);
        for param in params {
            match &param.data {
                None => put_i32(body, -1),
                Some(data) => {
                    put_i32(body, data.len() as i32);
                    put_bytes(body, data);
                }
            }
        }

        // Result format codes
        put_i16(body, result_formats.len() as i16);
        for &fmt in result_formats {
            put_i16(body, fmt as i16);
        }
    });
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    frame(buf, super::msg_type::EXECUTE, |body| {
        put_cstr(body, portal);
        put_i32(body, max_rows as i32);
    });
}

/// Write a Describe message to get metadata.
///
/// - `describe_type`: 'S' for statement, 'P' for portal
/// - `name`: Statement or portal name
pub fn write_describe(buf: &mut Vec<u8>, describe_type: u8, name: &str) {
    frame(buf, super::msg_type::DESCRIBE, |body| {
        put_u8(body, describe_type);
        put_cstr(body, name);
    });
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'S', name);
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'P', name);
}

/// Write a Close message to release a statement or portal.
///
/// - `close_type`: 'S' for statement, 'P' for portal
/// - `name`: Statement or portal name
pub fn write_close(buf: &mut Vec<u8>, close_type: u8, name: &str) {
    frame(buf, super::msg_type::CLOSE, |body| {
        put_u8(body, close_type);
        put_cstr(body, name);
    });
}

/// Write a Close message for a statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'S', name);
}

/// Write a Close message for a portal.
pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'P', name);
}

/// Write a Sync message.
///
/// This ends an extended query sequence and causes:
/// - Implicit COMMIT if successful and not in explicit transaction
/// - Implicit ROLLBACK if failed and not in explicit transaction
/// - Server responds with ReadyForQuery
pub fn write_sync(buf: &mut Vec<u8>) {
    frame(buf, super::msg_type::SYNC, |_| {});
}

/// Write a Flush message.
///
/// Forces the server to send all pending responses without waiting for Sync.
pub fn write_flush(buf: &mut Vec<u8>) {
    frame(buf, super::msg_type::FLUSH, |_| {});
}
