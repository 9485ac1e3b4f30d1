//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any
//! I/O. They produce `Action` values that tell the caller what to do next.
//!
//! On a server error the machines keep draining until ReadyForQuery and
//! stash the error; the driver surfaces it via `take_error()` once the
//! machine finishes. This keeps the connection observable state at
//! ReadyForQuery after every operation, successful or not.

pub mod action;
pub mod extended;
pub mod simple;
pub mod startup;

pub use action::{Action, AsyncMessage};
pub use extended::{CloseStatementStateMachine, PrepareStateMachine, PreparedStatement};
pub use simple::{QueryHandler, SimpleQueryStateMachine};
pub use startup::StartupStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

/// Trait for state machines that can be driven by a connection.
pub trait StateMachine {
    /// Process input and return the next action to perform.
    ///
    /// The driver should:
    /// 1. Call `step()` to get the next action
    /// 2. Perform the action (read/write/tls handshake)
    /// 3. Repeat until `Action::Finished`
    ///
    /// When a write action is returned, the driver writes
    /// `buffer_set.write_buffer` to the socket and flushes.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Get the transaction status from the final ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;

    /// Take the server error stashed while draining, if any.
    fn take_error(&mut self) -> Option<crate::error::Error> {
        None
    }
}
