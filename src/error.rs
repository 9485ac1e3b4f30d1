//! Error types for pglink.

use std::collections::HashMap;
use thiserror::Error;

/// Result type for pglink operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error field type codes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_V: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Structured server error/notice record.
///
/// Carries every field-tagged value from an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone)]
pub struct ServerError(pub(crate) HashMap<u8, String>);

impl ServerError {
    /// Create from a map of field codes to values.
    pub fn new(fields: HashMap<u8, String>) -> Self {
        Self(fields)
    }

    // Always present (PostgreSQL 9.6+)

    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub fn severity(&self) -> &str {
        self.0
            .get(&field_type::SEVERITY)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Severity (non-localized, never translated)
    pub fn severity_v(&self) -> &str {
        self.0
            .get(&field_type::SEVERITY_V)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// SQLSTATE error code (5 characters)
    pub fn code(&self) -> &str {
        self.0
            .get(&field_type::CODE)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Primary error message
    pub fn message(&self) -> &str {
        self.0
            .get(&field_type::MESSAGE)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    // Optional fields

    /// Detailed error explanation
    pub fn detail(&self) -> Option<&str> {
        self.0.get(&field_type::DETAIL).map(|s| s.as_str())
    }

    /// Suggestion for fixing the error
    pub fn hint(&self) -> Option<&str> {
        self.0.get(&field_type::HINT).map(|s| s.as_str())
    }

    /// Cursor position in query string (1-based)
    pub fn position(&self) -> Option<u32> {
        self.0
            .get(&field_type::POSITION)
            .and_then(|s| s.parse().ok())
    }

    /// Context/stack trace
    pub fn where_(&self) -> Option<&str> {
        self.0.get(&field_type::WHERE).map(|s| s.as_str())
    }

    /// Schema name
    pub fn schema(&self) -> Option<&str> {
        self.0.get(&field_type::SCHEMA).map(|s| s.as_str())
    }

    /// Table name
    pub fn table(&self) -> Option<&str> {
        self.0.get(&field_type::TABLE).map(|s| s.as_str())
    }

    /// Column name
    pub fn column(&self) -> Option<&str> {
        self.0.get(&field_type::COLUMN).map(|s| s.as_str())
    }

    /// Constraint name
    pub fn constraint(&self) -> Option<&str> {
        self.0.get(&field_type::CONSTRAINT).map(|s| s.as_str())
    }

    /// Source file name
    pub fn file(&self) -> Option<&str> {
        self.0.get(&field_type::FILE).map(|s| s.as_str())
    }

    /// Source line number
    pub fn line(&self) -> Option<u32> {
        self.0.get(&field_type::LINE).and_then(|s| s.parse().ok())
    }

    /// Source routine name
    pub fn routine(&self) -> Option<&str> {
        self.0.get(&field_type::ROUTINE).map(|s| s.as_str())
    }

    /// Get a field by its type code.
    pub fn get(&self, field_type: u8) -> Option<&str> {
        self.0.get(&field_type).map(|s| s.as_str())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for pglink.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection is dead and cannot be reused
    #[error("Connection is dead")]
    ConnectionDead,

    /// Another operation is still in flight on this connection
    #[error("Connection is busy with another operation")]
    Busy,

    /// The pool was closed
    #[error("Pool is closed")]
    PoolClosed,

    /// Operation deadline expired
    #[error("Operation timed out")]
    Timeout,

    /// Invalid connection configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid usage (e.g., commit on a foreign connection)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Parameter cannot be represented in the target wire format
    #[error("Encode error: {0}")]
    Encode(String),

    /// Value decode error
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Returns true if the error kills the connection.
    ///
    /// I/O errors, protocol violations and FATAL/PANIC server errors leave
    /// the socket in an unknown state; encode/decode errors do not.
    ///
    /// A server error can also be fatal for a contextual reason this
    /// predicate cannot see: arriving outside a transaction block after
    /// earlier statements of the same pipeline group already took effect,
    /// where ROLLBACK cannot recover. The connection layer escalates that
    /// case itself (see the batch reader), since only it knows the
    /// transaction state.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::Protocol(_) | Error::ConnectionDead => true,
            Error::Server(err) => matches!(err.severity_v(), "FATAL" | "PANIC"),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.code()),
            _ => None,
        }
    }

    pub(crate) fn type_mismatch(from: &str, target_oid: crate::protocol::types::Oid) -> Self {
        Error::Encode(format!("cannot encode {} as oid {}", from, target_oid))
    }

    pub(crate) fn overflow(value: &str, target: &str) -> Self {
        Error::Encode(format!("{} out of range for {}", value, target))
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(severity_v: &str, code: &str) -> ServerError {
        let mut fields = HashMap::new();
        fields.insert(field_type::SEVERITY, severity_v.to_string());
        fields.insert(field_type::SEVERITY_V, severity_v.to_string());
        fields.insert(field_type::CODE, code.to_string());
        fields.insert(field_type::MESSAGE, "boom".to_string());
        ServerError::new(fields)
    }

    #[test]
    fn fatal_severity_kills_connection() {
        assert!(Error::Server(server_error("FATAL", "57P01")).is_fatal());
        assert!(Error::Server(server_error("PANIC", "XX000")).is_fatal());
        assert!(!Error::Server(server_error("ERROR", "23505")).is_fatal());
    }

    #[test]
    fn decode_errors_are_recoverable() {
        assert!(!Error::Decode("bad int".into()).is_fatal());
        assert!(!Error::Encode("bad arg".into()).is_fatal());
        assert!(Error::Protocol("bad tag".into()).is_fatal());
    }

    #[test]
    fn sqlstate_surfaced() {
        let err = Error::Server(server_error("ERROR", "23505"));
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(Error::Busy.sqlstate(), None);
    }
}
