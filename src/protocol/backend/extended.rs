//! Extended query protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::Cursor;
use crate::protocol::types::Oid;

/// ParseComplete message.
#[derive(Debug, Clone, Copy)]
pub struct ParseComplete;

impl ParseComplete {
    /// Parse a ParseComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// BindComplete message.
#[derive(Debug, Clone, Copy)]
pub struct BindComplete;

impl BindComplete {
    /// Parse a BindComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// CloseComplete message.
#[derive(Debug, Clone, Copy)]
pub struct CloseComplete;

impl CloseComplete {
    /// Parse a CloseComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// NoData message - the described statement or portal returns no rows.
#[derive(Debug, Clone, Copy)]
pub struct NoData;

impl NoData {
    /// Parse a NoData message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// PortalSuspended message - Execute reached its row limit.
#[derive(Debug, Clone, Copy)]
pub struct PortalSuspended;

impl PortalSuspended {
    /// Parse a PortalSuspended message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// ParameterDescription message - parameter type OIDs for a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut msg = Cursor::new(payload);
        let count = msg.i16()?.max(0);
        let mut oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            oids.push(msg.u32()?);
        }
        Ok(Self { oids })
    }

    /// Get the parameter OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.oids
    }
}
