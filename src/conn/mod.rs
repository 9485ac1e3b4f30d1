//! Synchronous PostgreSQL connection.

mod batch;
mod cancel;
mod copy;
mod rows;
mod stream;
mod transaction;

pub use batch::{Batch, BatchResult, BatchResults};
pub use cancel::CancelToken;
pub use rows::{Row, Rows};
pub use transaction::Transaction;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{RawMessage, ReadyForQuery, RowDescription, msg_type};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_sync, write_terminate,
};
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::sanitize;
use crate::state::action::{Action, AsyncMessage};
use crate::state::extended::{CloseStatementStateMachine, PrepareStateMachine, PreparedStatement};
use crate::state::simple::{CollectHandler, SimpleQueryStateMachine, TagHandler};
use crate::state::startup::{StartupConfig, StartupStateMachine};
use crate::state::StateMachine;
use crate::statement::{self, StatementCache};
use crate::types::value::Value;
use crate::types::TypeRegistry;

use stream::Stream;

/// An asynchronous notification delivered by LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Payload string
    pub payload: String,
}

/// The command tag from a CommandComplete message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandTag(String);

impl CommandTag {
    pub(crate) fn new(tag: String) -> Self {
        Self(tag)
    }

    /// The raw tag text ("INSERT 0 3", "SELECT 7", …).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rows affected parsed from the tag; 0 when the tag carries no count.
    pub fn rows_affected(&self) -> u64 {
        crate::protocol::backend::CommandComplete { tag: &self.0 }
            .rows_affected()
            .unwrap_or(0)
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rows plus column names collected through the simple protocol.
#[derive(Debug, Default)]
pub struct SimpleResult {
    /// Column names of the last result set
    pub columns: Vec<String>,
    /// Raw column payloads (text format), `None` for NULL
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Last command tag
    pub tag: CommandTag,
}

/// A synchronous connection to one PostgreSQL backend.
///
/// A connection is single-owner: between any two public calls it is either
/// dead or sitting at ReadyForQuery. In-flight state (a `Rows` cursor, a
/// batch, a COPY) borrows the connection exclusively until drained.
pub struct Conn {
    stream: Stream,
    buffers: BufferSet,
    opts: Opts,
    backend_key: Option<(u32, u32)>,
    parameters: HashMap<String, String>,
    transaction_status: TransactionStatus,
    registry: TypeRegistry,
    cache: StatementCache,
    notifications: VecDeque<Notification>,
    listening: HashSet<String>,
    alive: bool,
    death_cause: Option<String>,
    /// ReadyForQuery messages still owed by the server.
    pending_ready: u32,
    /// Per-read deadline for in-flight operations.
    read_deadline: Option<Duration>,
}

impl Conn {
    /// Connect using a URI or keyword/value connection string.
    ///
    /// Missing fields are resolved from the `PG*` environment and the
    /// pgpass file.
    pub fn new(dsn: &str) -> Result<Self> {
        let opts = Opts::parse(dsn)?.resolve()?;
        Self::connect(opts)
    }

    /// Connect with fully resolved options.
    pub fn connect(opts: Opts) -> Result<Self> {
        tracing::debug!(host = %opts.host, port = opts.port, user = %opts.user, "connecting");

        let mut stream = Stream::open(&opts)?;
        let mut buffers = BufferSet::new();

        // Handshake reads are bounded by the connect timeout
        stream.set_read_timeout(opts.connect_timeout)?;

        let request_ssl = opts.ssl_mode.request_ssl() && cfg!(feature = "tls");
        if opts.ssl_mode.require_ssl() && !cfg!(feature = "tls") {
            return Err(Error::Unsupported(
                "sslmode requires TLS but the tls feature is not enabled".into(),
            ));
        }

        let config = StartupConfig {
            user: opts.user.clone(),
            password: opts.password.clone(),
            params: opts.startup_params(),
            request_ssl,
            require_ssl: opts.ssl_mode.require_ssl(),
        };

        let mut sm = StartupStateMachine::new(config);
        let mut notifications = VecDeque::new();
        let mut parameters = HashMap::new();

        loop {
            match sm.step(&mut buffers)? {
                Action::Write => {
                    stream.write_all(&buffers.write_buffer)?;
                    stream.flush()?;
                }
                Action::WriteAndReadByte => {
                    stream.write_all(&buffers.write_buffer)?;
                    stream.flush()?;
                    let byte = stream.read_u8()?;
                    sm.set_ssl_response(byte);
                }
                Action::ReadMessage => {
                    stream.read_message(&mut buffers)?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffers.write_buffer)?;
                    stream.flush()?;
                    stream.read_message(&mut buffers)?;
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "tls")]
                    {
                        stream = stream.upgrade_to_tls(&opts)?;
                        stream.set_read_timeout(opts.connect_timeout)?;
                        if let Some(hash) = stream.channel_binding() {
                            sm.set_channel_binding(hash);
                        }
                    }
                    #[cfg(not(feature = "tls"))]
                    {
                        return Err(Error::Unsupported(
                            "server accepted SSL but the tls feature is not enabled".into(),
                        ));
                    }
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    match msg {
                        AsyncMessage::Notification {
                            pid,
                            channel,
                            payload,
                        } => notifications.push_back(Notification {
                            pid,
                            channel,
                            payload,
                        }),
                        AsyncMessage::Notice(notice) => {
                            tracing::debug!(notice = %notice, "server notice during startup");
                        }
                        AsyncMessage::ParameterChanged { name, value } => {
                            parameters.insert(name, value);
                        }
                    }
                    stream.read_message(&mut buffers)?;
                }
                Action::Finished => break,
            }
        }

        stream.set_read_timeout(None)?;

        for (name, value) in sm.take_server_params() {
            parameters.insert(name, value);
        }

        let backend_key = sm.backend_key();
        let transaction_status = sm.transaction_status();

        tracing::debug!(pid = backend_key.map(|(pid, _)| pid), "connected");

        Ok(Self {
            stream,
            buffers,
            backend_key,
            parameters,
            transaction_status,
            registry: TypeRegistry::default(),
            cache: StatementCache::new(opts.statement_cache_capacity),
            notifications,
            listening: HashSet::new(),
            alive: true,
            death_cause: None,
            pending_ready: 0,
            read_deadline: None,
            opts,
        })
    }

    // === Accessors ===

    /// Backend process id reported at startup.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend_key.map(|(pid, _)| pid)
    }

    /// A server-reported runtime parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    /// Current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// True while the connection can run operations.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Why the connection died, if it did.
    pub fn death_cause(&self) -> Option<&str> {
        self.death_cause.as_deref()
    }

    /// This connection's type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Mutable access to the registry, for custom type registration
    /// between queries.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// A token for cancelling this connection's current query from
    /// another thread.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key
            .map(|(pid, secret)| CancelToken::new(&self.opts, pid, secret))
    }

    /// Channels currently LISTENed on.
    pub fn listening_channels(&self) -> impl Iterator<Item = &str> {
        self.listening.iter().map(|s| s.as_str())
    }

    // === Simple protocol ===

    /// Run a simple query and return the last command tag.
    ///
    /// Multiple statements are allowed; the first error is surfaced after
    /// the reply stream has been consumed to ReadyForQuery.
    pub fn exec(&mut self, sql: &str) -> Result<CommandTag> {
        self.ensure_ready()?;
        tracing::trace!(sql, "exec");

        let mut handler = TagHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut self.buffers, sql);
        self.pending_ready += 1;
        self.drive(&mut sm)?;
        Ok(CommandTag::new(handler.take_tag().unwrap_or_default()))
    }

    /// Run a simple query with `$N` placeholders substituted as literals.
    ///
    /// This is the opt-out from the extended protocol; arguments are
    /// sanitized into the SQL text. Refused when the server reports
    /// `standard_conforming_strings = off`.
    pub fn exec_params(&mut self, sql: &str, params: &[Value]) -> Result<CommandTag> {
        let sql = self.interpolate(sql, params)?;
        self.exec(&sql)
    }

    /// Run a (possibly interpolated) simple query and collect its rows.
    pub fn query_simple(&mut self, sql: &str, params: &[Value]) -> Result<SimpleResult> {
        let sql = self.interpolate(sql, params)?;
        self.ensure_ready()?;

        let mut handler = CollectHandler::new();
        let mut sm = SimpleQueryStateMachine::new(&mut handler, &mut self.buffers, &sql);
        self.pending_ready += 1;
        self.drive(&mut sm)?;

        Ok(SimpleResult {
            columns: handler.columns().map(|c| c.to_vec()).unwrap_or_default(),
            rows: handler.take_rows(),
            tag: CommandTag::new(handler.take_tag().unwrap_or_default()),
        })
    }

    fn interpolate(&self, sql: &str, params: &[Value]) -> Result<String> {
        if params.is_empty() {
            return Ok(sql.to_string());
        }
        if self.parameter("standard_conforming_strings") == Some("off") {
            return Err(Error::Unsupported(
                "simple-protocol interpolation requires standard_conforming_strings = on".into(),
            ));
        }
        sanitize::interpolate(sql, params)
    }

    // === Extended protocol ===

    /// Run a parameterized query and stream its rows.
    ///
    /// `sql` may also name a statement created with [`Self::prepare`].
    /// Statements are auto-prepared and cached by SQL text; result columns
    /// are fetched in binary format where the registry can decode it.
    pub fn query<'a>(&'a mut self, sql: &str, params: &[Value]) -> Result<Rows<'a>> {
        self.ensure_ready()?;
        tracing::trace!(sql, params = params.len(), "query");

        let (statement, cache_key) = self.statement_for(sql)?;

        if params.len() != statement.param_oids.len() {
            return Err(Error::Encode(format!(
                "statement takes {} parameters, {} given",
                statement.param_oids.len(),
                params.len()
            )));
        }

        let mut bind_params = Vec::with_capacity(params.len());
        for (value, &oid) in params.iter().zip(&statement.param_oids) {
            bind_params.push(self.registry.encode_param(value, oid)?);
        }

        let mut fields = match statement.row_desc_payload() {
            Some(payload) => RowDescription::parse(payload)?.to_owned_fields(),
            None => Vec::new(),
        };
        for field in &mut fields {
            field.format = self.registry.result_format(field.type_oid);
        }
        let result_formats: Vec<FormatCode> = fields.iter().map(|f| f.format).collect();

        self.buffers.write_buffer.clear();
        write_bind(
            &mut self.buffers.write_buffer,
            "",
            &statement.name,
            &bind_params,
            &result_formats,
        );
        write_describe_portal(&mut self.buffers.write_buffer, "");
        write_execute(&mut self.buffers.write_buffer, "", 0);
        write_sync(&mut self.buffers.write_buffer);
        self.write_flush()?;
        self.pending_ready += 1;

        Ok(Rows::new(self, fields, cache_key))
    }

    /// Run a query that must return exactly one row.
    pub fn query_row(&mut self, sql: &str, params: &[Value]) -> Result<Row> {
        let mut rows = self.query(sql, params)?;
        let row = if rows.next() { rows.take_current() } else { None };
        rows.close()?;
        row.ok_or_else(|| Error::Decode("query returned no rows".into()))
    }

    /// Prepare a named statement.
    ///
    /// Preparing the same name with identical SQL is a no-op; a different
    /// SQL under an existing name is rejected.
    pub fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        self.ensure_ready()?;

        if let Some(existing) = self.cache.get_named(name) {
            if existing.sql == sql {
                return Ok(());
            }
            return Err(Error::InvalidUsage(format!(
                "prepared statement \"{}\" already exists",
                name
            )));
        }

        let statement = self.prepare_wire(name, sql)?;
        self.cache.insert_named(name.to_string(), statement);
        Ok(())
    }

    /// Deallocate a named statement.
    ///
    /// The cache entry is removed before the wire command so the cache
    /// never points at a statement the server lost.
    pub fn deallocate(&mut self, name: &str) -> Result<()> {
        self.ensure_ready()?;
        self.cache.remove_named(name);
        self.exec(&format!("deallocate {}", sanitize::quote_identifier(name)))?;
        Ok(())
    }

    /// Resolve the statement to execute: explicit name, cached
    /// auto-prepare, or a fresh prepare.
    fn statement_for(&mut self, sql: &str) -> Result<(PreparedStatement, Option<String>)> {
        if let Some(statement) = self.cache.get_named(sql) {
            return Ok((statement.clone(), None));
        }
        if let Some(statement) = self.cache.get_auto(sql) {
            return Ok((statement.clone(), Some(sql.to_string())));
        }

        let name = self.cache.next_auto_name();
        let statement = self.prepare_wire(&name, sql)?;
        if let Some(evicted) = self
            .cache
            .insert_auto(sql.to_string(), statement.clone())
        {
            // Best effort: the server-side statement of the evicted entry
            // is closed so names don't pile up.
            let _ = self.close_statement_wire(&evicted.name);
        }
        Ok((statement, Some(sql.to_string())))
    }

    fn prepare_wire(&mut self, name: &str, sql: &str) -> Result<PreparedStatement> {
        let mut sm = PrepareStateMachine::new(&mut self.buffers, name, sql, &[]);
        self.pending_ready += 1;
        self.drive(&mut sm)?;
        Ok(sm.take_statement())
    }

    fn close_statement_wire(&mut self, name: &str) -> Result<()> {
        let mut sm = CloseStatementStateMachine::new(&mut self.buffers, name);
        self.pending_ready += 1;
        self.drive(&mut sm)
    }

    /// Drop a stale auto-prepare entry after a schema-change error.
    pub(crate) fn invalidate_cached(&mut self, cache_key: &str, sqlstate: &str) {
        if statement::invalidates_cache(sqlstate) {
            self.cache.remove_auto(cache_key);
        }
    }

    // === LISTEN / NOTIFY ===

    /// LISTEN on a channel. Arbitrary channel names are accepted; the
    /// identifier is quoted on the wire.
    pub fn listen(&mut self, channel: &str) -> Result<()> {
        self.exec(&format!("listen {}", sanitize::quote_identifier(channel)))?;
        self.listening.insert(channel.to_string());
        Ok(())
    }

    /// UNLISTEN a channel.
    pub fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.exec(&format!("unlisten {}", sanitize::quote_identifier(channel)))?;
        self.listening.remove(channel);
        Ok(())
    }

    /// UNLISTEN every channel.
    pub fn unlisten_all(&mut self) -> Result<()> {
        self.exec("unlisten *")?;
        self.listening.clear();
        Ok(())
    }

    /// Pop an already-received notification without touching the socket.
    pub fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    /// Wait for a notification up to the deadline.
    ///
    /// On timeout the connection stays usable; the deadline only ever
    /// fires between messages, never inside one.
    pub fn wait_for_notification(&mut self, timeout: Duration) -> Result<Notification> {
        self.ensure_ready()?;

        if let Some(notification) = self.notifications.pop_front() {
            return Ok(notification);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            match self
                .stream
                .read_message_deadline(&mut self.buffers, remaining)
            {
                Ok(false) => return Err(Error::Timeout),
                Ok(true) => {
                    let type_byte = self.buffers.type_byte;
                    if RawMessage::is_async_type(type_byte) {
                        let msg = AsyncMessage::parse(type_byte, &self.buffers.read_buffer)
                            .inspect_err(|e| self.mark_dead(&e.to_string()))?;
                        self.absorb_async(msg);
                        if let Some(notification) = self.notifications.pop_front() {
                            return Ok(notification);
                        }
                    } else {
                        let err = Error::Protocol(format!(
                            "unexpected message '{}' while idle",
                            type_byte as char
                        ));
                        self.mark_dead(&err.to_string());
                        return Err(err);
                    }
                }
                Err(err) => {
                    self.mark_dead(&err.to_string());
                    return Err(err);
                }
            }
        }
    }

    // === Type loading ===

    /// Resolve type names against the server catalogs and register codecs
    /// for them (enums, domains, composites, ranges and their arrays).
    pub fn load_types(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.load_type(name)?;
        }
        Ok(())
    }

    fn load_type(&mut self, name: &str) -> Result<()> {
        if self.registry.oid_of(name).is_some() {
            return Ok(());
        }

        const TYPE_QUERY: &str = "select t.oid, t.typtype::text, t.typbasetype, t.typelem, \
             t.typarray, t.typrelid, coalesce(r.rngsubtype, 0) \
             from pg_type t left join pg_range r on r.rngtypid = t.oid \
             where t.typname = $1";

        let row = self
            .query_row(TYPE_QUERY, &[Value::from(name.trim_start_matches('_'))])
            .map_err(|e| match e {
                Error::Decode(_) => Error::Config(format!("type {:?} not found", name)),
                other => other,
            })?;

        let (oid, typtype, base, elem, array, relid, subtype) =
            row.scan::<(i64, String, i64, i64, i64, i64, i64)>()?;
        let oid = oid as u32;

        match typtype.as_str() {
            "e" => self.registry.register_enum(oid, name.trim_start_matches('_')),
            "d" => {
                let base = base as u32;
                if self.registry.codec(base).is_none() {
                    return Err(Error::Config(format!(
                        "domain {:?} has unregistered base type oid {}",
                        name, base
                    )));
                }
                self.registry
                    .register_domain(oid, name.trim_start_matches('_'), base)?;
            }
            "r" => {
                self.registry
                    .register_range(oid, name.trim_start_matches('_'), subtype as u32)?;
            }
            "c" => {
                let fields = self.load_composite_fields(relid as u32)?;
                self.registry
                    .register_composite(oid, name.trim_start_matches('_'), fields)?;
            }
            "b" => {
                // Base type with no built-in codec: expose the OID so raw
                // values round-trip by name.
                let _ = elem;
                self.registry
                    .register_name(name.trim_start_matches('_'), oid);
            }
            other => {
                return Err(Error::Config(format!(
                    "type {:?} has unsupported typtype {:?}",
                    name, other
                )));
            }
        }

        // The element's array container, when the catalog has one
        let array = array as u32;
        if array != 0 && self.registry.codec(oid).is_some() {
            let array_name = format!("_{}", name.trim_start_matches('_'));
            let _ = self.registry.register_array(array, &array_name, oid);
        }

        Ok(())
    }

    fn load_composite_fields(
        &mut self,
        relid: u32,
    ) -> Result<Vec<crate::types::CompositeField>> {
        const ATTR_QUERY: &str = "select attname, atttypid from pg_attribute \
             where attrelid = $1 and attnum > 0 and not attisdropped order by attnum";

        let mut rows = self.query(ATTR_QUERY, &[Value::Int8(i64::from(relid))])?;
        let mut fields = Vec::new();
        while rows.next() {
            let (attname, atttypid) = rows.scan::<(String, i64)>()?;
            fields.push(crate::types::CompositeField {
                name: attname,
                oid: atttypid as u32,
            });
        }
        rows.close()?;
        Ok(fields)
    }

    // === Liveness ===

    /// Cheap liveness probe: an empty query costs one round trip.
    pub fn ping(&mut self) -> Result<()> {
        self.exec("")?;
        Ok(())
    }

    /// Close the connection gracefully.
    pub fn close(mut self) -> Result<()> {
        if !self.alive {
            return Ok(());
        }
        self.buffers.write_buffer.clear();
        write_terminate(&mut self.buffers.write_buffer);
        let result = self.write_flush();
        self.alive = false;
        result
    }

    // === Internals ===

    pub(crate) fn buffers(&mut self) -> &mut BufferSet {
        &mut self.buffers
    }

    pub(crate) fn mark_dead(&mut self, cause: &str) {
        if self.alive {
            tracing::warn!(cause, "connection marked dead");
            self.alive = false;
            self.death_cause = Some(cause.to_string());
        }
    }

    pub(crate) fn write_flush(&mut self) -> Result<()> {
        let result: std::io::Result<()> = (|| {
            self.stream.write_all(&self.buffers.write_buffer)?;
            self.stream.flush()
        })();
        if let Err(e) = result {
            self.mark_dead(&e.to_string());
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Set a per-read deadline for subsequent operations.
    ///
    /// When a read times out, a CancelRequest is dispatched on a side
    /// channel and the reply stream is drained to ReadyForQuery; the
    /// operation fails with [`Error::Timeout`] but the connection stays
    /// usable unless draining itself failed.
    pub fn set_read_deadline(&mut self, deadline: Option<Duration>) {
        self.read_deadline = deadline;
    }

    /// Read one message, marking the connection dead on I/O failure.
    ///
    /// This is the single place ReadyForQuery messages are counted off.
    pub(crate) fn read_message(&mut self) -> Result<()> {
        if let Some(deadline) = self.read_deadline {
            return self.read_message_with_deadline(deadline);
        }

        let stream = &mut self.stream;
        let buffers = &mut self.buffers;
        match stream.read_message(buffers) {
            Ok(()) => {
                if self.buffers.type_byte == msg_type::READY_FOR_QUERY {
                    self.pending_ready = self.pending_ready.saturating_sub(1);
                }
                Ok(())
            }
            Err(e) => {
                self.mark_dead(&e.to_string());
                Err(e)
            }
        }
    }

    fn read_message_with_deadline(&mut self, deadline: Duration) -> Result<()> {
        if deadline.is_zero() {
            return self.handle_read_timeout();
        }
        let stream = &mut self.stream;
        let buffers = &mut self.buffers;
        match stream.read_message_deadline(buffers, deadline) {
            Ok(true) => {
                if self.buffers.type_byte == msg_type::READY_FOR_QUERY {
                    self.pending_ready = self.pending_ready.saturating_sub(1);
                }
                Ok(())
            }
            Ok(false) => self.handle_read_timeout(),
            Err(e) => {
                self.mark_dead(&e.to_string());
                Err(e)
            }
        }
    }

    /// Deadline expired between messages: best-effort cancel on the side
    /// channel, then drain what the server still sends.
    fn handle_read_timeout(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token() {
            let _ = token.cancel();
        }
        self.read_deadline = None;
        while self.pending_ready > 0 {
            self.drain_one_ready()?;
        }
        Err(Error::Timeout)
    }

    /// Absorb an async message into the connection state.
    pub(crate) fn absorb_async(&mut self, msg: AsyncMessage) {
        match msg {
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                self.notifications.push_back(Notification {
                    pid,
                    channel,
                    payload,
                });
            }
            AsyncMessage::Notice(notice) => {
                tracing::debug!(notice = %notice, "server notice");
                log::debug!("server notice: {}", notice);
            }
            AsyncMessage::ParameterChanged { name, value } => {
                self.parameters.insert(name, value);
            }
        }
    }

    /// Absorb the just-read message if it is async; returns true when the
    /// caller should read again.
    pub(crate) fn absorb_if_async(&mut self) -> Result<bool> {
        let type_byte = self.buffers.type_byte;
        if !RawMessage::is_async_type(type_byte) {
            return Ok(false);
        }
        let msg = AsyncMessage::parse(type_byte, &self.buffers.read_buffer)
            .inspect_err(|e| self.mark_dead(&e.to_string()))?;
        self.absorb_async(msg);
        Ok(true)
    }

    /// Record a consumed ReadyForQuery (the counter was already adjusted
    /// by [`Self::read_message`]).
    pub(crate) fn finish_ready(&mut self) -> Result<()> {
        let ready = match ReadyForQuery::parse(&self.buffers.read_buffer) {
            Ok(ready) => ready,
            Err(e) => {
                self.mark_dead(&e.to_string());
                return Err(e);
            }
        };
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        Ok(())
    }

    /// Discard everything up to (and including) one ReadyForQuery.
    pub(crate) fn drain_one_ready(&mut self) -> Result<()> {
        loop {
            self.read_message()?;
            if self.absorb_if_async()? {
                continue;
            }
            if self.buffers.type_byte == msg_type::READY_FOR_QUERY {
                return self.finish_ready();
            }
            // Everything else in an abandoned exchange is discarded
        }
    }

    /// Bring the connection to ReadyForQuery, consuming any exchange an
    /// abandoned cursor left behind.
    pub(crate) fn ensure_ready(&mut self) -> Result<()> {
        if !self.alive {
            return Err(Error::ConnectionDead);
        }
        while self.pending_ready > 0 {
            self.drain_one_ready()?;
        }
        Ok(())
    }

    /// Drive a state machine to completion and surface its stashed error.
    fn drive<M: StateMachine>(&mut self, sm: &mut M) -> Result<()> {
        let result = self.drive_inner(sm);
        match result {
            Ok(()) => {
                self.transaction_status = sm.transaction_status();
                match sm.take_error() {
                    Some(err) => {
                        if err.is_fatal() {
                            self.mark_dead(&err.to_string());
                        }
                        Err(err)
                    }
                    None => Ok(()),
                }
            }
            Err(err) => {
                // A Timeout has already drained the stream; anything else
                // leaves the socket mid-message
                if err.is_fatal() {
                    self.mark_dead(&err.to_string());
                }
                Err(err)
            }
        }
    }

    fn drive_inner<M: StateMachine>(&mut self, sm: &mut M) -> Result<()> {
        loop {
            match sm.step(&mut self.buffers)? {
                Action::Write => {
                    self.write_flush()?;
                }
                Action::ReadMessage => {
                    self.read_message()?;
                }
                Action::WriteAndReadMessage => {
                    self.write_flush()?;
                    self.read_message()?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.absorb_async(msg);
                    self.read_message()?;
                }
                Action::Finished => return Ok(()),
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "handshake action outside of startup".into(),
                    ));
                }
            }
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.alive {
            self.buffers.write_buffer.clear();
            write_terminate(&mut self.buffers.write_buffer);
            let _ = self.stream.write_all(&self.buffers.write_buffer);
            let _ = self.stream.flush();
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("backend_pid", &self.backend_pid())
            .field("alive", &self.alive)
            .field("transaction_status", &self.transaction_status)
            .field("pending_ready", &self.pending_ready)
            .finish()
    }
}
