//! Batched queries: many statements, one synchronization point.

use crate::convert::FromRow;
use crate::error::{Error, Result, ServerError};
use crate::protocol::backend::{
    CommandComplete, ErrorResponse, RowDescription, msg_type, query::OwnedFieldDescription,
};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_parse, write_query, write_sync,
};
use crate::protocol::types::Oid;
use crate::types::value::Value;
use crate::types::TypeRegistry;

use super::{CommandTag, Conn};

/// A queue of (sql, parameters) pairs sent under a single Sync.
///
/// With [`Batch::transactional`] the whole queue is wrapped in
/// BEGIN/COMMIT simple queries for all-or-nothing semantics.
#[derive(Default)]
pub struct Batch {
    items: Vec<(String, Vec<Value>)>,
    wrap_transaction: bool,
}

impl Batch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one statement.
    pub fn queue(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.items.push((sql.to_string(), params));
        self
    }

    /// Wrap the batch in BEGIN/COMMIT.
    pub fn transactional(&mut self, yes: bool) -> &mut Self {
        self.wrap_transaction = yes;
        self
    }

    /// Number of queued statements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The outcome of one batch item.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Command tag of the statement
    pub tag: CommandTag,
    /// Column headers (empty for statements without a result set)
    pub fields: Vec<OwnedFieldDescription>,
    /// Raw rows, text format
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
}

impl BatchResult {
    /// Decode the rows into typed tuples.
    pub fn typed_rows<T: for<'a> FromRow<'a>>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| {
                let columns: Vec<Option<&[u8]>> = row.iter().map(|c| c.as_deref()).collect();
                T::from_row(&self.fields, &columns)
            })
            .collect()
    }

    /// Decode the rows into owned values through a registry.
    pub fn values(&self, registry: &TypeRegistry) -> Result<Vec<Vec<Value>>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.fields)
                    .map(|(bytes, field)| {
                        registry.decode(field.type_oid, field.format, bytes.as_deref())
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Items,
    Done,
}

/// Reader over a sent batch's replies, in queue order.
pub struct BatchResults<'a> {
    conn: &'a mut Conn,
    remaining: usize,
    wrapped: bool,
    phase: Phase,
    /// First server error in this Sync group; later items inherit it
    failed: Option<ServerError>,
    /// Whether the Sync's ReadyForQuery was already consumed by a drain
    synced: bool,
    /// Items whose CommandComplete already arrived in this Sync group
    completed: usize,
    /// Whether an error can still be undone by ROLLBACK (BEGIN/COMMIT
    /// wrapping or an enclosing explicit transaction)
    recoverable: bool,
}

impl Conn {
    /// Send a batch and return the reader for its results.
    ///
    /// Every statement is parsed unnamed, bound with its arguments'
    /// natural types, and executed; exactly one Sync follows the queue.
    pub fn run_batch(&mut self, batch: Batch) -> Result<BatchResults<'_>> {
        self.ensure_ready()?;

        // An error can only be rolled back when the group runs inside a
        // transaction block, the wrapper's or the caller's
        let recoverable = batch.wrap_transaction || self.transaction_status.in_transaction();

        if batch.items.is_empty() && !batch.wrap_transaction {
            return Ok(BatchResults {
                conn: self,
                remaining: 0,
                wrapped: false,
                phase: Phase::Done,
                failed: None,
                synced: true,
                completed: 0,
                recoverable,
            });
        }

        let mut encoded: Vec<(String, Vec<Oid>, Vec<crate::protocol::frontend::BindParam>)> =
            Vec::with_capacity(batch.items.len());
        for (sql, params) in &batch.items {
            let oids: Vec<Oid> = params.iter().map(|v| v.natural_oid()).collect();
            let mut bind_params = Vec::with_capacity(params.len());
            for value in params {
                bind_params.push(self.registry.encode_param(value, value.natural_oid())?);
            }
            encoded.push((sql.clone(), oids, bind_params));
        }

        self.buffers.write_buffer.clear();
        if batch.wrap_transaction {
            write_query(&mut self.buffers.write_buffer, "begin");
        }
        for (sql, oids, bind_params) in &encoded {
            write_parse(&mut self.buffers.write_buffer, "", sql, oids);
            write_bind(&mut self.buffers.write_buffer, "", "", bind_params, &[]);
            write_describe_portal(&mut self.buffers.write_buffer, "");
            write_execute(&mut self.buffers.write_buffer, "", 0);
        }
        write_sync(&mut self.buffers.write_buffer);
        if batch.wrap_transaction {
            write_query(&mut self.buffers.write_buffer, "commit");
        }
        self.write_flush()?;
        self.pending_ready += 1 + if batch.wrap_transaction { 2 } else { 0 };

        Ok(BatchResults {
            conn: self,
            remaining: batch.items.len(),
            wrapped: batch.wrap_transaction,
            phase: if batch.wrap_transaction {
                Phase::Begin
            } else {
                Phase::Items
            },
            failed: None,
            synced: false,
            completed: 0,
            recoverable,
        })
    }
}

impl BatchResults<'_> {
    /// Read the next item's result, in queue order.
    ///
    /// After the first error, every later item in the same Sync group
    /// fails with that error while its messages are drained. When the
    /// group had no transaction block and earlier items already took
    /// effect, the error is unrecoverable and the connection is marked
    /// dead instead; the reader then yields nothing further.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<BatchResult>> {
        loop {
            match self.phase {
                Phase::Begin => {
                    if let Err(e) = self.consume_simple_exchange() {
                        self.phase = Phase::Done;
                        return Some(Err(e));
                    }
                    self.phase = Phase::Items;
                }
                Phase::Items => {
                    if self.remaining == 0 {
                        if let Err(e) = self.finish_streams() {
                            self.phase = Phase::Done;
                            return Some(Err(e));
                        }
                        self.phase = Phase::Done;
                        return None;
                    }
                    self.remaining -= 1;

                    if let Some(err) = &self.failed {
                        return Some(Err(Error::Server(err.clone())));
                    }
                    return Some(self.read_item());
                }
                Phase::Done => return None,
            }
        }
    }

    /// Consume any remaining replies so the connection is Ready again.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        while let Some(result) = self.next() {
            let _ = result;
        }
        Ok(())
    }

    /// The first error of the Sync group, if one occurred.
    pub fn err(&self) -> Option<&ServerError> {
        self.failed.as_ref()
    }

    fn read_item(&mut self) -> Result<BatchResult> {
        let mut result = BatchResult::default();

        loop {
            self.conn.read_message().inspect_err(|_| {
                self.phase = Phase::Done;
            })?;
            if self.conn.absorb_if_async()? {
                continue;
            }

            let type_byte = self.conn.buffers().type_byte;
            match type_byte {
                msg_type::PARSE_COMPLETE | msg_type::BIND_COMPLETE | msg_type::NO_DATA => {}
                msg_type::ROW_DESCRIPTION => {
                    let parsed = RowDescription::parse(&self.conn.buffers().read_buffer)
                        .map(|desc| desc.to_owned_fields());
                    result.fields = parsed.inspect_err(|e| {
                        let cause = e.to_string();
                        self.conn.mark_dead(&cause);
                        self.phase = Phase::Done;
                    })?;
                }
                msg_type::DATA_ROW => {
                    let payload = &self.conn.buffers().read_buffer;
                    let row = crate::protocol::backend::DataRow::parse(payload)?;
                    result
                        .rows
                        .push(row.iter().map(|c| c.map(|b| b.to_vec())).collect());
                }
                msg_type::COMMAND_COMPLETE => {
                    if let Ok(complete) =
                        CommandComplete::parse(&self.conn.buffers().read_buffer)
                    {
                        result.tag = CommandTag::new(complete.tag.to_string());
                    }
                    self.completed += 1;
                    return Ok(result);
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    self.completed += 1;
                    return Ok(result);
                }
                msg_type::ERROR_RESPONSE => {
                    let response = ErrorResponse::parse(&self.conn.buffers().read_buffer)?;
                    self.failed = Some(response.0.clone());
                    let err = response.into_error();
                    if err.is_fatal() {
                        self.conn.mark_dead(&err.to_string());
                        self.phase = Phase::Done;
                        return Err(err);
                    }
                    // An error after earlier items already took effect with
                    // no transaction block to roll them back cannot be
                    // recovered; the connection is killed rather than left
                    // looking consistent
                    if !self.recoverable && self.completed > 0 {
                        self.conn.mark_dead(&format!(
                            "unrecoverable batch error after {} committed statements: {}",
                            self.completed, err
                        ));
                        self.phase = Phase::Done;
                        self.synced = true;
                        return Err(err);
                    }
                    // The server skips to the Sync; consume its ReadyForQuery
                    self.conn.drain_one_ready()?;
                    self.synced = true;
                    return Err(err);
                }
                other => {
                    let err = Error::Protocol(format!(
                        "unexpected message in batch: '{}'",
                        other as char
                    ));
                    self.conn.mark_dead(&err.to_string());
                    self.phase = Phase::Done;
                    return Err(err);
                }
            }
        }
    }

    /// Consume one simple-query exchange (the BEGIN/COMMIT wrappers).
    fn consume_simple_exchange(&mut self) -> Result<()> {
        self.conn.drain_one_ready()
    }

    fn finish_streams(&mut self) -> Result<()> {
        if !self.synced {
            self.conn.drain_one_ready()?;
            self.synced = true;
        }
        if self.wrapped {
            // The trailing COMMIT (a ROLLBACK on a failed group)
            self.conn.drain_one_ready()?;
        }
        Ok(())
    }
}

impl Drop for BatchResults<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
