//! Extended query protocol state machines.
//!
//! Only the fixed-shape exchanges live here: preparing a named statement
//! (Parse + Describe + Sync) and closing one (Close + Sync). The
//! Bind/Execute result stream is pulled lazily by the rows cursor instead
//! of being pushed through a handler.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CloseComplete, ErrorResponse, NoData, ParameterDescription, ParseComplete, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::{
    write_close_statement, write_describe_statement, write_parse, write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Server-side prepared statement metadata.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Wire protocol statement name (empty string means the unnamed statement)
    pub name: String,
    /// The SQL text the statement was parsed from
    pub sql: String,
    /// Parameter type OIDs reported by ParameterDescription
    pub param_oids: Vec<Oid>,
    /// Raw RowDescription payload (None if the statement returns no rows)
    row_desc_payload: Option<Vec<u8>>,
}

impl PreparedStatement {
    /// Create prepared statement metadata.
    pub fn new(name: String, param_oids: Vec<Oid>, row_desc_payload: Option<Vec<u8>>) -> Self {
        Self {
            name,
            sql: String::new(),
            param_oids,
            row_desc_payload,
        }
    }

    /// Get the raw RowDescription payload.
    ///
    /// Returns `None` if the statement doesn't return rows.
    pub fn row_desc_payload(&self) -> Option<&[u8]> {
        self.row_desc_payload.as_deref()
    }
}

/// Prepare state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingDescribe,
    WaitingRowDesc,
    WaitingReady,
    Draining,
    Finished,
}

/// State machine for preparing a named statement
/// (Parse + Describe-statement + Sync).
pub struct PrepareStateMachine {
    state: State,
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    row_desc_payload: Option<Vec<u8>>,
    transaction_status: TransactionStatus,
    error: Option<Error>,
}

impl PrepareStateMachine {
    /// Queue Parse + Describe + Sync for the given statement.
    pub fn new(buffer_set: &mut BufferSet, name: &str, query: &str, param_oids: &[Oid]) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, name, query, param_oids);
        write_describe_statement(&mut buffer_set.write_buffer, name);
        write_sync(&mut buffer_set.write_buffer);

        Self {
            state: State::Initial,
            name: name.to_string(),
            sql: query.to_string(),
            param_oids: Vec::new(),
            row_desc_payload: None,
            transaction_status: TransactionStatus::Idle,
            error: None,
        }
    }

    /// Take the prepared statement metadata (after the machine finishes
    /// without error).
    pub fn take_statement(&mut self) -> PreparedStatement {
        let mut statement = PreparedStatement::new(
            std::mem::take(&mut self.name),
            std::mem::take(&mut self.param_oids),
            self.row_desc_payload.take(),
        );
        statement.sql = std::mem::take(&mut self.sql);
        statement
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = State::Finished;
        Ok(Action::Finished)
    }
}

impl StateMachine for PrepareStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::WaitingParse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            if self.error.is_none() {
                self.error = Some(error.into_error());
            }
            self.state = State::Draining;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingParse => {
                if type_byte != msg_type::PARSE_COMPLETE {
                    return Err(Error::Protocol(format!(
                        "Expected ParseComplete, got '{}'",
                        type_byte as char
                    )));
                }
                ParseComplete::parse(&buffer_set.read_buffer)?;
                self.state = State::WaitingDescribe;
                Ok(Action::ReadMessage)
            }
            State::WaitingDescribe => {
                if type_byte != msg_type::PARAMETER_DESCRIPTION {
                    return Err(Error::Protocol(format!(
                        "Expected ParameterDescription, got '{}'",
                        type_byte as char
                    )));
                }
                let param_desc = ParameterDescription::parse(&buffer_set.read_buffer)?;
                self.param_oids = param_desc.oids().to_vec();
                self.state = State::WaitingRowDesc;
                Ok(Action::ReadMessage)
            }
            State::WaitingRowDesc => match type_byte {
                msg_type::ROW_DESCRIPTION => {
                    self.row_desc_payload = Some(buffer_set.read_buffer.clone());
                    self.state = State::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                msg_type::NO_DATA => {
                    NoData::parse(&buffer_set.read_buffer)?;
                    self.state = State::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                _ => Err(Error::Protocol(format!(
                    "Expected RowDescription or NoData, got '{}'",
                    type_byte as char
                ))),
            },
            State::WaitingReady | State::Draining => {
                if type_byte == msg_type::READY_FOR_QUERY {
                    return self.finish(&buffer_set.read_buffer);
                }
                if self.state == State::Draining {
                    // Discard everything between the error and ReadyForQuery
                    return Ok(Action::ReadMessage);
                }
                Err(Error::Protocol(format!(
                    "Expected ReadyForQuery, got '{}'",
                    type_byte as char
                )))
            }
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

/// Close-statement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    Initial,
    WaitingClose,
    Draining,
    Finished,
}

/// State machine for closing a named statement (Close + Sync).
pub struct CloseStatementStateMachine {
    state: CloseState,
    transaction_status: TransactionStatus,
    error: Option<Error>,
}

impl CloseStatementStateMachine {
    /// Queue Close + Sync for the given statement name.
    pub fn new(buffer_set: &mut BufferSet, name: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_close_statement(&mut buffer_set.write_buffer, name);
        write_sync(&mut buffer_set.write_buffer);

        Self {
            state: CloseState::Initial,
            transaction_status: TransactionStatus::Idle,
            error: None,
        }
    }
}

impl StateMachine for CloseStatementStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == CloseState::Initial {
            self.state = CloseState::WaitingClose;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            if self.error.is_none() {
                self.error = Some(error.into_error());
            }
            self.state = CloseState::Draining;
            return Ok(Action::ReadMessage);
        }

        match type_byte {
            msg_type::CLOSE_COMPLETE => {
                CloseComplete::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = CloseState::Finished;
                Ok(Action::Finished)
            }
            _ if self.state == CloseState::Draining => Ok(Action::ReadMessage),
            _ => Err(Error::Protocol(format!(
                "Expected CloseComplete or ReadyForQuery, got '{}'",
                type_byte as char
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
