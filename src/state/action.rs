//! Action types for state machine I/O requests.

use crate::error::ServerError;

/// Action requested by a state machine.
///
/// The caller should perform the requested I/O and then call `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer` to the server and flush.
    Write,

    /// Write `buffer_set.write_buffer` to the server, then read a single byte
    /// and hand it back via the machine's response setter.
    ///
    /// Used for SSL negotiation: write SSL request, then read 'S' or 'N'.
    WriteAndReadByte,

    /// Read one PostgreSQL message from the server.
    ///
    /// The caller should:
    /// 1. Read the message type byte (1 byte)
    /// 2. Read the length (4 bytes, big-endian i32, includes itself)
    /// 3. Read (length - 4) bytes of payload into the buffer set
    ReadMessage,

    /// Write `buffer_set.write_buffer`, then read a message.
    WriteAndReadMessage,

    /// Perform the TLS handshake, then call `step()` again.
    TlsHandshake,

    /// An asynchronous message was received.
    ///
    /// The caller should absorb the message, read the next message,
    /// then call `step()` again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The state machine has finished.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive between any two messages of any exchange.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ServerError),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Parse an async message from a raw backend message.
    pub fn parse(type_byte: u8, payload: &[u8]) -> crate::error::Result<Self> {
        use crate::protocol::backend::{
            NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
        };

        match type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(payload)?;
                Ok(AsyncMessage::Notice(notice.0))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                Ok(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                })
            }
            _ => Err(crate::error::Error::Protocol(format!(
                "Unknown async message type: '{}'",
                type_byte as char
            ))),
        }
    }
}
