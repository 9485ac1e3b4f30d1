//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, RawMessage, ReadyForQuery,
    auth::NegotiateProtocolVersion, auth::ParameterStatus, msg_type,
};
use crate::protocol::frontend::auth::{ScramClient, md5_password};
use crate::protocol::frontend::{
    startup::write_ssl_request, write_password, write_sasl_initial_response, write_sasl_response,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    WaitingTlsHandshake,
    WaitingAuthRead,
    WaitingAuth,
    SaslInProgressRead,
    SaslInProgress,
    WaitingAuthResultRead,
    WaitingAuthResult,
    WaitingReady,
    Finished,
}

/// Startup inputs, resolved from the connection options by the driver.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Database user (also used for MD5 salting)
    pub user: String,
    /// Password, if any
    pub password: Option<String>,
    /// Startup parameter pairs (user, database, application_name, runtime params)
    pub params: Vec<(String, String)>,
    /// Whether to open with an SSLRequest
    pub request_ssl: bool,
    /// Whether a plaintext fallback is a configuration error
    pub require_ssl: bool,
}

/// Connection startup state machine.
///
/// Drives SSLRequest negotiation, the startup packet, and the cleartext /
/// MD5 / SCRAM authentication exchanges until the first ReadyForQuery.
pub struct StartupStateMachine {
    state: State,
    config: StartupConfig,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
    /// SSL response byte, set by driver after WriteAndReadByte
    ssl_response: u8,
    /// TLS certificate hash for SCRAM channel binding, set by driver after TlsHandshake
    channel_binding: Option<Vec<u8>>,
}

impl StartupStateMachine {
    /// Create a new startup state machine.
    pub fn new(config: StartupConfig) -> Self {
        Self {
            state: State::Initial,
            config,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
            ssl_response: 0,
            channel_binding: None,
        }
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Take server parameters reported during startup.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    /// Set the SSL response byte (called by driver after WriteAndReadByte).
    pub fn set_ssl_response(&mut self, response: u8) {
        self.ssl_response = response;
    }

    /// Provide the TLS certificate hash for SCRAM-SHA-256-PLUS
    /// (called by driver after the TLS handshake, if available).
    pub fn set_channel_binding(&mut self, cert_hash: Vec<u8>) {
        self.channel_binding = Some(cert_hash);
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();

        if self.config.request_ssl {
            write_ssl_request(&mut buffer_set.write_buffer);
            self.state = State::WaitingSslResponse;
            Ok(Action::WriteAndReadByte)
        } else {
            self.write_startup_message(&mut buffer_set.write_buffer);
            self.state = State::WaitingAuthRead;
            Ok(Action::Write)
        }
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response {
            b'S' => {
                self.state = State::WaitingTlsHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.config.require_ssl {
                    return Err(Error::Auth(
                        "SSL required but not supported by server".into(),
                    ));
                }
                // SSL refused, continue in plaintext
                buffer_set.write_buffer.clear();
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.state = State::WaitingAuthRead;
                Ok(Action::Write)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected SSL response: {}",
                self.ssl_response
            ))),
        }
    }

    fn handle_tls_handshake_complete(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        self.write_startup_message(&mut buffer_set.write_buffer);
        self.state = State::WaitingAuthRead;
        Ok(Action::Write)
    }

    fn write_startup_message(&self, write_buffer: &mut Vec<u8>) {
        let params: Vec<(&str, &str)> = self
            .config
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        write_startup(write_buffer, &params);
    }

    fn password(&self) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn handle_auth_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;

        if type_byte == msg_type::NEGOTIATE_PROTOCOL_VERSION {
            let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
            return Err(Error::Protocol(format!(
                "Server negotiated protocol 3.{}; unrecognized options: {:?}",
                negotiate.newest_minor_version, negotiate.unrecognized_options
            )));
        }

        if type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &password);
                self.state = State::WaitingAuthResultRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.config.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = State::WaitingAuthResultRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                let password = self.password()?.to_string();

                // Prefer the channel-bound variant when the stream can bind
                let (mechanism, scram) = if mechanisms.contains(&"SCRAM-SHA-256-PLUS")
                    && self.channel_binding.is_some()
                {
                    let cb = self.channel_binding.as_deref().unwrap_or_default();
                    (
                        "SCRAM-SHA-256-PLUS",
                        ScramClient::new_with_channel_binding(&password, cb),
                    )
                } else if mechanisms.contains(&"SCRAM-SHA-256") {
                    ("SCRAM-SHA-256", ScramClient::new(&password))
                } else {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                };

                let client_first = scram.client_first_message();

                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    mechanism,
                    client_first.as_bytes(),
                );

                self.scram_client = Some(scram);
                self.state = State::SaslInProgressRead;
                Ok(Action::Write)
            }
            _ => Err(Error::Unsupported(format!(
                "Unsupported authentication method: {:?}",
                auth
            ))),
        }
    }

    fn handle_sasl_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        if type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;

                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(Error::Auth)?;

                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                self.state = State::SaslInProgressRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let scram = self
                    .scram_client
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;

                scram
                    .verify_server_final(server_final)
                    .map_err(Error::Auth)?;

                self.state = State::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                auth
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        if type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected AuthenticationOk, got '{}'",
                type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Auth(format!("Unexpected auth result: {:?}", auth))),
        }
    }

    fn handle_ready_message(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                type_byte as char
            ))),
        }
    }
}

impl StateMachine for StartupStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        // States that don't consume a message
        match self.state {
            State::Initial => return self.handle_initial(buffer_set),
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            State::WaitingTlsHandshake => return self.handle_tls_handshake_complete(buffer_set),
            State::WaitingAuthRead => {
                self.state = State::WaitingAuth;
                return Ok(Action::ReadMessage);
            }
            State::SaslInProgressRead => {
                self.state = State::SaslInProgress;
                return Ok(Action::ReadMessage);
            }
            State::WaitingAuthResultRead => {
                self.state = State::WaitingAuthResult;
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        let type_byte = buffer_set.type_byte;

        // Async messages can arrive at any time, except that ParameterStatus
        // during WaitingReady is part of normal startup, not async.
        if RawMessage::is_async_type(type_byte)
            && !(self.state == State::WaitingReady && type_byte == msg_type::PARAMETER_STATUS)
        {
            let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
        }

        // Any error during startup is fatal to the handshake
        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingAuth => self.handle_auth_message(buffer_set),
            State::SaslInProgress => self.handle_sasl_message(buffer_set),
            State::WaitingAuthResult => self.handle_auth_result(buffer_set),
            State::WaitingReady => self.handle_ready_message(buffer_set),
            _ => Err(Error::Protocol(format!(
                "Unexpected state {:?}",
                self.state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
