//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::{write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Callbacks for simple query results.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// Multi-statement queries repeat the pattern once per statement.
pub trait QueryHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }

    /// Called for an empty query string.
    fn empty_query(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A handler that only records the last command tag.
#[derive(Debug, Default)]
pub struct TagHandler {
    tag: Option<String>,
}

impl TagHandler {
    /// Create a new tag handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the last command tag seen.
    pub fn take_tag(&mut self) -> Option<String> {
        self.tag.take()
    }
}

impl QueryHandler for TagHandler {
    fn row(&mut self, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.tag = Some(complete.tag.to_string());
        Ok(())
    }
}

/// A handler that collects column names and raw rows.
#[derive(Debug, Default)]
pub struct CollectHandler {
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    tag: Option<String>,
}

impl CollectHandler {
    /// Create a new collect handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Column names of the last result set, if any.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Take the collected raw rows.
    pub fn take_rows(&mut self) -> Vec<Vec<Option<Vec<u8>>>> {
        std::mem::take(&mut self.rows)
    }

    /// Take the last command tag seen.
    pub fn take_tag(&mut self) -> Option<String> {
        self.tag.take()
    }
}

impl QueryHandler for CollectHandler {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        self.columns = Some(cols.iter().map(|f| f.name.to_string()).collect());
        Ok(())
    }

    fn row(&mut self, _cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        self.rows
            .push(row.iter().map(|col| col.map(|b| b.to_vec())).collect());
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.tag = Some(complete.tag.to_string());
        Ok(())
    }
}

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    Draining,
    Finished,
}

/// Simple query protocol state machine.
///
/// After an ErrorResponse the server discards messages until the end of the
/// query string, so this machine stashes the first error and keeps draining
/// until ReadyForQuery; the driver surfaces the error afterwards.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    column_buffer: Vec<u8>,
    transaction_status: TransactionStatus,
    error: Option<Error>,
}

impl<'a, H: QueryHandler> SimpleQueryStateMachine<'a, H> {
    /// Create a state machine and queue the Query message.
    pub fn new(handler: &'a mut H, buffer_set: &mut BufferSet, query: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, query);

        Self {
            state: State::Initial,
            handler,
            column_buffer: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            error: None,
        }
    }

    fn stash_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = State::Finished;
        Ok(Action::Finished)
    }

    fn handle_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                // Keep the column payload around for row callbacks
                self.column_buffer.clear();
                self.column_buffer.extend_from_slice(payload);
                let cols = RowDescription::parse(&self.column_buffer)?;
                if let Err(e) = self.handler.result_start(cols) {
                    self.stash_error(e);
                    self.state = State::Draining;
                } else {
                    self.state = State::ProcessingRows;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                if let Err(e) = self.handler.result_end(complete) {
                    self.stash_error(e);
                    self.state = State::Draining;
                }
                // More commands may follow in a multi-statement query
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.handler.empty_query()?;
                Ok(Action::ReadMessage)
            }
            msg_type::COPY_IN_RESPONSE => {
                // COPY FROM STDIN cannot be serviced through this path; back
                // out with CopyFail so the server aborts the statement.
                buffer_set.write_buffer.clear();
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN is not supported by exec",
                );
                self.state = State::Draining;
                Ok(Action::WriteAndReadMessage)
            }
            msg_type::COPY_OUT_RESPONSE | msg_type::COPY_DATA | msg_type::COPY_DONE => {
                // COPY TO STDOUT data surfaced through exec is discarded
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in query response: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&self.column_buffer)?;
                let row = DataRow::parse(payload)?;
                if let Err(e) = self.handler.row(cols, row) {
                    self.stash_error(e);
                    self.state = State::Draining;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                if let Err(e) = self.handler.result_end(complete) {
                    self.stash_error(e);
                    self.state = State::Draining;
                } else {
                    // More commands may follow
                    self.state = State::WaitingResponse;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in row processing: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_draining(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte == msg_type::READY_FOR_QUERY {
            return self.finish(&buffer_set.read_buffer);
        }
        // Everything else between the error and ReadyForQuery is discarded
        Ok(Action::ReadMessage)
    }
}

impl<H: QueryHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            // Query message was queued by the constructor
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            self.stash_error(error.into_error());
            self.state = State::Draining;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingResponse => self.handle_response(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::Draining => self.handle_draining(buffer_set),
            _ => Err(Error::Protocol(format!(
                "Unexpected state {:?}",
                self.state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}
