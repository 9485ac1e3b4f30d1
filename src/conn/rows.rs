//! Lazy cursor over a result set.

use crate::convert::FromRow;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RowDescription, msg_type,
    query::OwnedFieldDescription,
};
use crate::types::value::Value;
use crate::types::TypeRegistry;

use super::{CommandTag, Conn};

/// Streaming cursor over the rows of one query.
///
/// The cursor borrows the connection exclusively; dropping or closing it
/// consumes the remainder of the reply stream so the connection comes
/// back to ReadyForQuery.
pub struct Rows<'a> {
    conn: &'a mut Conn,
    fields: Vec<OwnedFieldDescription>,
    /// Auto-prepare cache key, for invalidation on schema-change errors
    cache_key: Option<String>,
    /// Raw payload of the current DataRow
    row_payload: Vec<u8>,
    have_row: bool,
    command_tag: Option<CommandTag>,
    error: Option<Error>,
    done: bool,
}

impl std::fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("fields", &self.fields)
            .field("cache_key", &self.cache_key)
            .field("have_row", &self.have_row)
            .field("command_tag", &self.command_tag)
            .field("error", &self.error)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a> Rows<'a> {
    pub(crate) fn new(
        conn: &'a mut Conn,
        fields: Vec<OwnedFieldDescription>,
        cache_key: Option<String>,
    ) -> Self {
        Self {
            conn,
            fields,
            cache_key,
            row_payload: Vec::new(),
            have_row: false,
            command_tag: None,
            error: None,
            done: false,
        }
    }

    /// Advance to the next row. Returns false at the end of the result
    /// set or on error; check [`Self::err`] afterwards.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.have_row = false;

        loop {
            if let Err(e) = self.conn.read_message() {
                self.stash(e);
                self.done = true;
                return false;
            }

            match self.conn.absorb_if_async() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    self.stash(e);
                    self.done = true;
                    return false;
                }
            }

            let type_byte = self.conn.buffers().type_byte;
            match type_byte {
                msg_type::DATA_ROW => {
                    std::mem::swap(&mut self.row_payload, &mut self.conn.buffers().read_buffer);
                    self.have_row = true;
                    return true;
                }
                msg_type::ROW_DESCRIPTION => {
                    // The portal describe reply carries the authoritative
                    // per-column formats
                    let parsed = RowDescription::parse(&self.conn.buffers().read_buffer)
                        .map(|desc| desc.to_owned_fields());
                    match parsed {
                        Ok(fields) => self.fields = fields,
                        Err(e) => {
                            let cause = e.to_string();
                            self.conn.mark_dead(&cause);
                            self.stash(e);
                            self.done = true;
                            return false;
                        }
                    }
                }
                msg_type::COMMAND_COMPLETE => {
                    if let Ok(complete) =
                        CommandComplete::parse(&self.conn.buffers().read_buffer)
                    {
                        self.command_tag = Some(CommandTag::new(complete.tag.to_string()));
                    }
                }
                msg_type::PARSE_COMPLETE
                | msg_type::BIND_COMPLETE
                | msg_type::NO_DATA
                | msg_type::PORTAL_SUSPENDED
                | msg_type::EMPTY_QUERY_RESPONSE
                | msg_type::CLOSE_COMPLETE => {}
                msg_type::ERROR_RESPONSE => {
                    match ErrorResponse::parse(&self.conn.buffers().read_buffer) {
                        Ok(response) => {
                            if let Some(key) = self.cache_key.clone() {
                                self.conn.invalidate_cached(&key, response.0.code());
                            }
                            let err = response.into_error();
                            if err.is_fatal() {
                                self.conn.mark_dead(&err.to_string());
                                self.stash(err);
                                self.done = true;
                                return false;
                            }
                            self.stash(err);
                            // Keep draining to ReadyForQuery
                        }
                        Err(e) => {
                            let cause = e.to_string();
                            self.conn.mark_dead(&cause);
                            self.stash(e);
                            self.done = true;
                            return false;
                        }
                    }
                }
                msg_type::READY_FOR_QUERY => {
                    if let Err(e) = self.conn.finish_ready() {
                        self.stash(e);
                    }
                    self.done = true;
                    return false;
                }
                other => {
                    let err = Error::Protocol(format!(
                        "unexpected message in result stream: '{}'",
                        other as char
                    ));
                    self.conn.mark_dead(&err.to_string());
                    self.stash(err);
                    self.done = true;
                    return false;
                }
            }
        }
    }

    fn stash(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Column headers of the result set.
    pub fn field_descriptions(&self) -> &[OwnedFieldDescription] {
        &self.fields
    }

    /// Raw column payloads of the current row; `None` entries are NULL.
    pub fn raw_values(&self) -> Vec<Option<&[u8]>> {
        if !self.have_row {
            return Vec::new();
        }
        match DataRow::parse(&self.row_payload) {
            Ok(row) => row.iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Decode the current row into typed targets.
    pub fn scan<'b, T: FromRow<'b>>(&'b self) -> Result<T> {
        if !self.have_row {
            return Err(Error::Decode("no current row".into()));
        }
        let row = DataRow::parse(&self.row_payload)?;
        let columns: Vec<Option<&[u8]>> = row.iter().collect();
        if columns.len() != self.fields.len() {
            return Err(Error::Decode(format!(
                "row has {} columns, header describes {}",
                columns.len(),
                self.fields.len()
            )));
        }
        T::from_row(&self.fields, &columns)
    }

    /// Decode every column of the current row into owned values via the
    /// connection's type registry.
    pub fn values(&self) -> Result<Vec<Value>> {
        if !self.have_row {
            return Err(Error::Decode("no current row".into()));
        }
        let row = DataRow::parse(&self.row_payload)?;
        let registry = self.conn.registry();
        row.iter()
            .zip(&self.fields)
            .map(|(bytes, field)| registry.decode(field.type_oid, field.format, bytes))
            .collect()
    }

    /// Detach the current row as an owned [`Row`].
    pub(crate) fn take_current(&mut self) -> Option<Row> {
        if !self.have_row {
            return None;
        }
        let row = DataRow::parse(&self.row_payload).ok()?;
        let columns = row.iter().map(|c| c.map(|b| b.to_vec())).collect();
        Some(Row {
            fields: self.fields.clone(),
            columns,
        })
    }

    /// The command tag; valid only after `next()` returned false without
    /// error.
    pub fn command_tag(&self) -> Option<&CommandTag> {
        self.command_tag.as_ref()
    }

    /// The first error hit while streaming, if any.
    pub fn err(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Drain the rest of the result set and surface its outcome.
    ///
    /// Closing twice is a no-op (the second call cannot exist: `close`
    /// consumes the cursor; dropping is the idempotent path).
    pub fn close(mut self) -> Result<CommandTag> {
        while self.next() {}
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        Ok(self.command_tag.clone().unwrap_or_default())
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        // Leaving rows unread must not wedge the connection
        while self.next() {}
    }
}

/// One owned row, detached from the connection.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Vec<OwnedFieldDescription>,
    columns: Vec<Option<Vec<u8>>>,
}

impl Row {
    /// Column headers.
    pub fn field_descriptions(&self) -> &[OwnedFieldDescription] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Raw payload of one column.
    pub fn get_raw(&self, index: usize) -> Option<&[u8]> {
        self.columns.get(index).and_then(|c| c.as_deref())
    }

    /// Decode the row into typed targets.
    pub fn scan<'a, T: FromRow<'a>>(&'a self) -> Result<T> {
        let columns: Vec<Option<&[u8]>> = self.columns.iter().map(|c| c.as_deref()).collect();
        T::from_row(&self.fields, &columns)
    }

    /// Decode every column into owned values.
    pub fn values(&self, registry: &TypeRegistry) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .zip(&self.fields)
            .map(|(bytes, field)| registry.decode(field.type_oid, field.format, bytes.as_deref()))
            .collect()
    }
}
