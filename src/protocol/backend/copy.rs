//! COPY subprotocol backend messages.

use crate::error::Result;
use crate::protocol::codec::Cursor;
use crate::protocol::types::FormatCode;

fn parse_copy_response(payload: &[u8]) -> Result<(FormatCode, Vec<FormatCode>)> {
    let mut msg = Cursor::new(payload);
    let format = FormatCode::from_u16(msg.u8()? as u16);

    let num_columns = msg.u16()?;
    let mut column_formats = Vec::with_capacity(num_columns as usize);
    for _ in 0..num_columns {
        column_formats.push(FormatCode::from_u16(msg.u16()?));
    }

    Ok((format, column_formats))
}

/// CopyInResponse message - server is ready to receive COPY data.
#[derive(Debug, Clone)]
pub struct CopyInResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyInResponse {
    /// Parse a CopyInResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}

/// CopyOutResponse message - server is about to send COPY data.
#[derive(Debug, Clone)]
pub struct CopyOutResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyOutResponse {
    /// Parse a CopyOutResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}

/// CopyBothResponse message - server is ready for bidirectional COPY (replication).
#[derive(Debug, Clone)]
pub struct CopyBothResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyBothResponse {
    /// Parse a CopyBothResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

/// CopyData message - COPY data (used in both directions).
#[derive(Debug, Clone, Copy)]
pub struct CopyData<'a> {
    /// Raw data bytes
    pub data: &'a [u8],
}

impl<'a> CopyData<'a> {
    /// Parse a CopyData message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(Self { data: payload })
    }
}

/// CopyDone message - COPY operation completed.
#[derive(Debug, Clone, Copy)]
pub struct CopyDone;

impl CopyDone {
    /// Parse a CopyDone message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_in_response_text() {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&2_u16.to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());

        let resp = CopyInResponse::parse(&payload).unwrap();
        assert!(!resp.is_binary());
        assert_eq!(resp.column_formats.len(), 2);
    }

    #[test]
    fn copy_out_response_binary() {
        let mut payload = vec![1u8];
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());

        let resp = CopyOutResponse::parse(&payload).unwrap();
        assert!(resp.is_binary());
        assert_eq!(resp.column_formats, vec![FormatCode::Binary]);
    }
}
