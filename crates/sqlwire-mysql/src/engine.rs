//! Sans-IO MySQL connection state machine.
//!
//! `ProtocolEngine` owns no socket. Callers push whatever bytes the server
//! sent into [`ProtocolEngine::receive`], flush [`ProtocolEngine::take_outbound`]
//! to the server, and collect results by [`Ticket`]. The blocking and async
//! connections are thin drivers around it.
//!
//! # Reply tracking
//!
//! Every command queues one or more pending entries in FIFO order. Packets
//! belonging to the oldest entry accumulate until a terminator arrives:
//!
//! - an EOF packet (`0xFE`, payload shorter than 9 bytes)
//! - an OK or ERR packet as the first packet of a reply
//! - any ERR packet
//!
//! Terminating pops the oldest entry and processes what accumulated.
//! Multiple commands may be queued before the first resolves; completions
//! are stored per ticket and resolve in submission order.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use sqlwire_core::error::{ConnectionError, ConnectionErrorKind, TypeError};
use sqlwire_core::{Error, Result, Value};

use crate::auth::{self, AuthPlugin, caching_sha2};
use crate::config::MySqlConfig;
use crate::protocol::{
    AuthSwitchRequest, ErrPacket, HandshakeInfo, OkPacket, Packet, PacketAssembler, PacketType,
    PrepareOk, SequenceCounter, WireCodec, build_login_packet, build_stmt_execute_packet,
    build_stmt_prepare_packet, frame_payload, payload_cursor,
};
use crate::result::{ExecuteResult, OkSummary, PrepareResult, ResultSet};
use crate::types::{ColumnDef, decode_binary_row};

/// Handle for a queued command (or the handshake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, transport not yet established
    Connecting,
    /// Waiting for the server greeting
    AwaitingHandshake,
    /// Login sent, waiting for the auth verdict
    Authenticating,
    /// Ready, nothing outstanding
    Idle,
    /// At least one command awaits its reply
    AwaitingResponse,
    /// Closed by the client
    Closed,
    /// A fatal error occurred
    Failed,
}

/// Result of a finished ticket.
#[derive(Debug, Clone)]
pub enum Completion {
    Handshake,
    Prepared(PrepareResult),
    Executed(ExecuteResult),
}

impl Completion {
    /// Expect a prepare completion.
    pub fn into_prepared(self) -> Result<PrepareResult> {
        match self {
            Completion::Prepared(p) => Ok(p),
            other => Err(unexpected_completion("prepare", &other)),
        }
    }

    /// Expect an execute completion.
    pub fn into_executed(self) -> Result<ExecuteResult> {
        match self {
            Completion::Executed(e) => Ok(e),
            other => Err(unexpected_completion("execute", &other)),
        }
    }
}

fn unexpected_completion(wanted: &str, got: &Completion) -> Error {
    let got = match got {
        Completion::Handshake => "handshake",
        Completion::Prepared(_) => "prepare",
        Completion::Executed(_) => "execute",
    };
    Error::protocol(format!("expected a {} result, got a {} result", wanted, got))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Handshake,
    PrepareOk,
    PrepareParams,
    PrepareColumns,
    ExecuteOk,
    ExecuteColumns,
    ExecuteRows,
}

#[derive(Debug)]
struct Pending {
    ticket: Ticket,
    kind: PendingKind,
    /// Statement text for error reporting
    sql: Option<String>,
}

/// Result under construction for the ticket at the front of the queue.
#[derive(Debug)]
enum Partial {
    Prepare(PrepareResult),
    Execute {
        column_count: Option<u64>,
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<Value>>,
    },
}

#[derive(Debug)]
struct AuthState {
    plugin: AuthPlugin,
    seed: Vec<u8>,
    awaiting_public_key: bool,
}

fn violation(message: impl fmt::Display) -> Error {
    Error::protocol(format!("protocol violation: {}", message))
}

/// MySQL binary-protocol client state machine.
#[derive(Debug)]
pub struct ProtocolEngine {
    config: MySqlConfig,
    state: EngineState,
    assembler: PacketAssembler,
    outbound: Vec<u8>,
    /// Sequence ids during the connection phase
    seq: SequenceCounter,
    callback_queue: VecDeque<Pending>,
    /// Raw payloads of the entry being answered
    recv_queue: Vec<Vec<u8>>,
    partial: Option<Partial>,
    completions: HashMap<Ticket, Result<Completion>>,
    reply_started: bool,
    last_seq: u8,
    next_ticket: u64,
    handshake: Option<HandshakeInfo>,
    auth: Option<AuthState>,
}

impl ProtocolEngine {
    pub fn new(config: MySqlConfig) -> Self {
        let max_payload = usize::try_from(config.max_packet_size).unwrap_or(usize::MAX);
        Self {
            config,
            state: EngineState::Connecting,
            assembler: PacketAssembler::with_max_payload(max_payload),
            outbound: Vec::new(),
            seq: SequenceCounter::new(),
            callback_queue: VecDeque::new(),
            recv_queue: Vec::new(),
            partial: None,
            completions: HashMap::new(),
            reply_started: false,
            last_seq: 0,
            next_ticket: 0,
            handshake: None,
            auth: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Server greeting, once received.
    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        self.handshake.as_ref()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.server_version.as_str())
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.handshake.as_ref().map(|h| h.connection_id)
    }

    /// Number of queued entries not yet answered.
    pub fn pending_count(&self) -> usize {
        self.callback_queue.len()
    }

    /// Whether `ticket` is still waiting for its reply.
    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.callback_queue.iter().any(|p| p.ticket == ticket)
    }

    /// Remove and return the result of a finished ticket.
    pub fn take_completion(&mut self, ticket: Ticket) -> Option<Result<Completion>> {
        self.completions.remove(&ticket)
    }

    /// Bytes to write to the server, in order.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// The transport is up; the server greeting comes next.
    pub fn on_connected(&mut self) -> Result<Ticket> {
        if self.state != EngineState::Connecting {
            return Err(violation(format!(
                "transport reported connected in state {:?}",
                self.state
            )));
        }
        self.state = EngineState::AwaitingHandshake;
        let ticket = self.enqueue(PendingKind::Handshake, None);
        tracing::debug!(ticket = %ticket, "Waiting for server handshake");
        Ok(ticket)
    }

    /// Queue `COM_STMT_PREPARE`.
    pub fn prepare(&mut self, sql: &str) -> Result<Ticket> {
        self.ensure_ready("COM_STMT_PREPARE")?;
        let payload = build_stmt_prepare_packet(sql, self.config.charset)?;
        self.send_command(&payload);
        let ticket = self.enqueue(PendingKind::PrepareOk, Some(sql.to_string()));
        tracing::debug!(ticket = %ticket, sql = %sql, "Queued COM_STMT_PREPARE");
        Ok(ticket)
    }

    /// Queue `COM_STMT_EXECUTE` for a prepared statement.
    pub fn execute(&mut self, stmt: &PrepareResult, params: &[Value]) -> Result<Ticket> {
        self.ensure_ready("COM_STMT_EXECUTE")?;
        if params.len() != stmt.param_count() {
            return Err(Error::Type(TypeError {
                expected: "one value per statement placeholder",
                actual: format!(
                    "{} values for {} placeholders",
                    params.len(),
                    stmt.param_count()
                ),
                column: None,
            }));
        }
        let payload = build_stmt_execute_packet(stmt.statement_id, params, self.config.charset)?;
        self.send_command(&payload);
        let sql = Some(stmt.sql.clone());
        let ticket = if stmt.has_result_set {
            let ticket = self.enqueue(PendingKind::ExecuteColumns, sql);
            self.callback_queue.push_back(Pending {
                ticket,
                kind: PendingKind::ExecuteRows,
                sql: None,
            });
            ticket
        } else {
            self.enqueue(PendingKind::ExecuteOk, sql)
        };
        tracing::debug!(
            ticket = %ticket,
            statement_id = stmt.statement_id,
            params = params.len(),
            "Queued COM_STMT_EXECUTE"
        );
        Ok(ticket)
    }

    /// Queue `COM_STMT_CLOSE`. The server sends no reply.
    #[cfg(feature = "teardown")]
    pub fn close_statement(&mut self, stmt: &PrepareResult) -> Result<()> {
        self.ensure_ready("COM_STMT_CLOSE")?;
        let payload = crate::protocol::prepared::build_stmt_close_packet(stmt.statement_id);
        self.send_command(&payload);
        tracing::debug!(statement_id = stmt.statement_id, "Queued COM_STMT_CLOSE");
        Ok(())
    }

    /// Queue `COM_QUIT` and close the engine.
    ///
    /// Commands still waiting for a reply fail with a disconnect error.
    #[cfg(feature = "teardown")]
    pub fn quit(&mut self) -> Result<()> {
        self.ensure_ready("COM_QUIT")?;
        self.send_command(&[crate::protocol::Command::Quit as u8]);
        self.abandon_pending("connection closed by client");
        self.state = EngineState::Closed;
        tracing::debug!("Queued COM_QUIT");
        Ok(())
    }

    /// Feed bytes read from the server.
    ///
    /// Returns an error only for fatal conditions (malformed or out-of-order
    /// packets, misuse); the engine is `Failed` afterwards. Server ERR
    /// packets are not fatal: they resolve their ticket with `Error::Query`.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == EngineState::Failed {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection has already failed".to_string(),
                source: None,
            }));
        }
        self.assembler.feed(bytes);
        loop {
            let packet = match self.assembler.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            };
            tracing::trace!(
                seq = packet.sequence_id,
                len = packet.payload.len(),
                state = ?self.state,
                "Dispatching packet"
            );
            if let Err(e) = self.dispatch(packet) {
                return Err(self.fail(e));
            }
        }
    }

    // === Internals ===

    fn ensure_ready(&self, command: &str) -> Result<()> {
        match self.state {
            EngineState::Idle | EngineState::AwaitingResponse => Ok(()),
            state => Err(violation(format!(
                "{} issued in state {:?} before the handshake completed",
                command, state
            ))),
        }
    }

    fn enqueue(&mut self, kind: PendingKind, sql: Option<String>) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.callback_queue.push_back(Pending { ticket, kind, sql });
        if self.state == EngineState::Idle {
            self.state = EngineState::AwaitingResponse;
        }
        ticket
    }

    /// Frame a command payload starting a fresh sequence.
    fn send_command(&mut self, payload: &[u8]) {
        let (bytes, _) = frame_payload(payload, 0);
        self.outbound.extend_from_slice(&bytes);
    }

    /// Frame a connection-phase payload continuing the current sequence.
    fn send_continuation(&mut self, payload: &[u8]) {
        let (bytes, next) = frame_payload(payload, self.seq.current());
        self.seq.set(next);
        self.outbound.extend_from_slice(&bytes);
    }

    fn password(&self) -> &str {
        self.config.password.as_deref().unwrap_or("")
    }

    /// `mysql_clear_password` only with explicit opt-in; there is no TLS.
    fn plugin_permitted(&self, plugin: AuthPlugin) -> bool {
        plugin != AuthPlugin::ClearPassword || self.config.allow_cleartext_password
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::warn!(error = %error, state = ?self.state, "Connection failed");
        self.abandon_pending(&error.to_string());
        self.state = EngineState::Failed;
        error
    }

    fn abandon_pending(&mut self, reason: &str) {
        while let Some(pending) = self.callback_queue.pop_front() {
            if self.completions.contains_key(&pending.ticket) {
                continue;
            }
            self.completions.insert(
                pending.ticket,
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: reason.to_string(),
                    source: None,
                })),
            );
        }
        self.recv_queue.clear();
        self.partial = None;
        self.reply_started = false;
    }

    fn dispatch(&mut self, packet: Packet) -> Result<()> {
        match self.state {
            EngineState::AwaitingHandshake => self.on_greeting(&packet),
            EngineState::Authenticating => self.on_auth_packet(&packet),
            EngineState::Idle | EngineState::AwaitingResponse => self.on_reply_packet(packet),
            state => Err(violation(format!("packet received in state {:?}", state))),
        }
    }

    fn check_sequence(expected: u8, got: u8) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "packet out of order: expected sequence id {}, got {}",
                expected, got
            )))
        }
    }

    // --- Connection phase ---

    fn on_greeting(&mut self, packet: &Packet) -> Result<()> {
        Self::check_sequence(0, packet.first_sequence_id)?;
        self.seq.follow(packet.sequence_id);

        if packet.packet_type() == PacketType::Error {
            let err = ErrPacket::parse(&packet.payload)?;
            self.fail_handshake(auth::auth_error(format!(
                "Server refused connection: {} ({})",
                err.error_message, err.error_code
            )));
            return Ok(());
        }

        let info = HandshakeInfo::parse(&packet.payload)?;
        tracing::debug!(
            server_version = %info.server_version,
            connection_id = info.connection_id,
            plugin = %info.auth_plugin,
            "Received server handshake"
        );

        // Unknown greeting plugins fall back to native password; the server
        // answers with an auth switch if it disagrees.
        let plugin = match info.plugin() {
            Ok(plugin) if self.plugin_permitted(plugin) => plugin,
            _ => AuthPlugin::NativePassword,
        };
        let response = plugin.initial_response(self.password(), &info.auth_data);
        let login = build_login_packet(&info, &self.config, plugin, &response);
        self.send_continuation(&login);

        self.auth = Some(AuthState {
            plugin,
            seed: info.auth_data.clone(),
            awaiting_public_key: plugin == AuthPlugin::Sha256Password
                && !self.password().is_empty(),
        });
        self.handshake = Some(info);
        self.state = EngineState::Authenticating;
        Ok(())
    }

    fn on_auth_packet(&mut self, packet: &Packet) -> Result<()> {
        Self::check_sequence(self.seq.current(), packet.first_sequence_id)?;
        self.seq.follow(packet.sequence_id);
        let payload = packet.payload.as_slice();

        match payload.first().copied() {
            Some(0x00) => {
                let ok = OkPacket::parse(payload)?;
                tracing::debug!(status_flags = ok.status_flags, "Authentication succeeded");
                self.auth = None;
                self.state = EngineState::Idle;
                self.resolve_front(Ok(Completion::Handshake));
                Ok(())
            }
            Some(0xFF) => {
                let err = ErrPacket::parse(payload)?;
                tracing::warn!(
                    code = err.error_code,
                    sqlstate = %err.sql_state,
                    message = %err.error_message,
                    "Authentication rejected"
                );
                self.fail_handshake(auth::auth_error(format!(
                    "Authentication failed: {} ({})",
                    err.error_message, err.error_code
                )));
                Ok(())
            }
            Some(0xFE) => self.on_auth_switch(payload),
            Some(caching_sha2::MORE_DATA) => self.on_auth_more_data(&payload[1..]),
            _ => Err(Error::protocol_with_data(
                "unexpected packet during authentication",
                payload,
            )),
        }
    }

    fn on_auth_switch(&mut self, payload: &[u8]) -> Result<()> {
        let request = AuthSwitchRequest::parse(payload)?;
        tracing::debug!(plugin = %request.plugin, "Auth switch requested");
        let plugin = match AuthPlugin::from_name(&request.plugin) {
            Ok(plugin) if self.plugin_permitted(plugin) => plugin,
            Ok(plugin) => {
                tracing::warn!(plugin = plugin.name(), "Refusing clear-text auth switch");
                self.fail_handshake(auth::auth_error(format!(
                    "Server requested {} but clear-text passwords are not allowed",
                    plugin.name()
                )));
                return Ok(());
            }
            Err(e) => {
                self.fail_handshake(e);
                return Ok(());
            }
        };
        let response = plugin.initial_response(self.password(), &request.auth_data);
        self.auth = Some(AuthState {
            plugin,
            awaiting_public_key: plugin == AuthPlugin::Sha256Password
                && !self.password().is_empty(),
            seed: request.auth_data,
        });
        self.send_continuation(&response);
        Ok(())
    }

    fn on_auth_more_data(&mut self, data: &[u8]) -> Result<()> {
        let auth = self
            .auth
            .as_mut()
            .ok_or_else(|| violation("auth data outside authentication"))?;
        let plugin = auth.plugin;

        if auth.awaiting_public_key {
            // `data` is the server's PEM public key
            auth.awaiting_public_key = false;
            let seed = auth.seed.clone();
            match auth::sha256_password_rsa(self.password(), &seed, data) {
                Ok(encrypted) => self.send_continuation(&encrypted),
                Err(e) => self.fail_handshake(e),
            }
            return Ok(());
        }

        match (plugin, data.first().copied()) {
            (AuthPlugin::CachingSha2Password, Some(caching_sha2::FAST_AUTH_SUCCESS)) => {
                tracing::trace!("caching_sha2_password fast auth succeeded");
                Ok(())
            }
            (AuthPlugin::CachingSha2Password, Some(caching_sha2::PERFORM_FULL_AUTH)) => {
                tracing::debug!("caching_sha2_password full auth, requesting public key");
                auth.awaiting_public_key = true;
                self.send_continuation(&[caching_sha2::REQUEST_PUBLIC_KEY]);
                Ok(())
            }
            _ => Err(Error::protocol_with_data(
                format!("unexpected auth data for {}", plugin.name()),
                data,
            )),
        }
    }

    fn fail_handshake(&mut self, error: Error) {
        self.auth = None;
        self.resolve_front(Err(error));
        self.abandon_pending("handshake failed");
        self.state = EngineState::Failed;
    }

    // --- Command phase ---

    fn on_reply_packet(&mut self, packet: Packet) -> Result<()> {
        let Some(front) = self.callback_queue.front() else {
            return Err(violation(format!(
                "packet with sequence id {} arrived with nothing pending",
                packet.first_sequence_id
            )));
        };
        let kind = front.kind;

        let expected = if self.reply_started {
            self.last_seq.wrapping_add(1)
        } else {
            1
        };
        Self::check_sequence(expected, packet.first_sequence_id)?;
        let first_of_reply = !self.reply_started;
        self.reply_started = true;
        self.last_seq = packet.sequence_id;

        let packet_type = packet.packet_type();
        if packet_type == PacketType::Error {
            return self.on_err_packet(&packet.payload);
        }

        match kind {
            PendingKind::Handshake => Err(violation("handshake entry in command phase")),
            PendingKind::PrepareOk => self.on_prepare_ok(&packet.payload),
            PendingKind::ExecuteOk if first_of_reply && packet_type == PacketType::Ok => {
                self.on_execute_ok(&packet.payload)
            }
            PendingKind::ExecuteOk => {
                // The statement produced rows after all
                if let Some(front) = self.callback_queue.front_mut() {
                    front.kind = PendingKind::ExecuteColumns;
                    let ticket = front.ticket;
                    self.callback_queue.insert(
                        1,
                        Pending {
                            ticket,
                            kind: PendingKind::ExecuteRows,
                            sql: None,
                        },
                    );
                }
                self.on_execute_columns(packet.payload, packet_type)
            }
            PendingKind::ExecuteColumns => self.on_execute_columns(packet.payload, packet_type),
            PendingKind::PrepareParams | PendingKind::PrepareColumns | PendingKind::ExecuteRows => {
                if packet_type == PacketType::Eof {
                    self.on_segment_end()
                } else {
                    self.recv_queue.push(packet.payload);
                    Ok(())
                }
            }
        }
    }

    fn on_err_packet(&mut self, payload: &[u8]) -> Result<()> {
        let err = ErrPacket::parse(payload)?;
        tracing::warn!(
            code = err.error_code,
            sqlstate = %err.sql_state,
            message = %err.error_message,
            "Server returned error"
        );
        let sql = self.callback_queue.front().and_then(|p| p.sql.clone());
        self.resolve_front(Err(err.into_error(sql)));
        Ok(())
    }

    fn on_prepare_ok(&mut self, payload: &[u8]) -> Result<()> {
        let ok = PrepareOk::parse(payload)?;
        let entry = self
            .callback_queue
            .pop_front()
            .ok_or_else(|| violation("prepare reply with nothing pending"))?;
        tracing::debug!(
            statement_id = ok.statement_id,
            params = ok.num_params,
            columns = ok.num_columns,
            "Statement prepared"
        );

        self.partial = Some(Partial::Prepare(PrepareResult {
            statement_id: ok.statement_id,
            sql: entry.sql.unwrap_or_default(),
            params_num: ok.num_params,
            columns_num: ok.num_columns,
            warning_count: ok.warnings,
            has_result_set: ok.num_columns > 0,
            params: Vec::new(),
            columns: Vec::new(),
        }));

        if ok.num_columns > 0 {
            self.callback_queue.push_front(Pending {
                ticket: entry.ticket,
                kind: PendingKind::PrepareColumns,
                sql: None,
            });
        }
        if ok.num_params > 0 {
            self.callback_queue.push_front(Pending {
                ticket: entry.ticket,
                kind: PendingKind::PrepareParams,
                sql: None,
            });
        }
        self.after_pop(entry.ticket);
        Ok(())
    }

    fn on_execute_ok(&mut self, payload: &[u8]) -> Result<()> {
        let ok = OkPacket::parse(payload)?;
        tracing::debug!(
            affected_rows = ok.affected_rows,
            last_insert_id = ok.last_insert_id,
            "Statement executed"
        );
        self.resolve_front(Ok(Completion::Executed(ExecuteResult::Ok(OkSummary::from(
            ok,
        )))));
        Ok(())
    }

    fn on_execute_columns(&mut self, payload: Vec<u8>, packet_type: PacketType) -> Result<()> {
        let partial = self.partial.get_or_insert_with(|| Partial::Execute {
            column_count: None,
            columns: Vec::new(),
            rows: Vec::new(),
        });
        let Partial::Execute { column_count, .. } = partial else {
            return Err(violation("execute reply while a prepare is in progress"));
        };

        if column_count.is_none() {
            if packet_type == PacketType::Ok {
                return self.on_execute_ok(&payload);
            }
            let mut cursor = payload_cursor(&payload);
            let count = cursor
                .read_lenenc_int()?
                .ok_or_else(|| Error::protocol("NULL column count"))?;
            *column_count = Some(count);
            return Ok(());
        }

        if packet_type == PacketType::Eof {
            self.on_segment_end()
        } else {
            self.recv_queue.push(payload);
            Ok(())
        }
    }

    /// An EOF closed the segment of the front entry.
    fn on_segment_end(&mut self) -> Result<()> {
        let entry = self
            .callback_queue
            .pop_front()
            .ok_or_else(|| violation("terminator arrived with nothing pending"))?;
        let packets = std::mem::take(&mut self.recv_queue);
        let charset = self.config.charset;

        match (entry.kind, self.partial.as_mut()) {
            (PendingKind::PrepareParams, Some(Partial::Prepare(prep))) => {
                prep.params = parse_columns(&packets, usize::from(prep.params_num))?;
            }
            (PendingKind::PrepareColumns, Some(Partial::Prepare(prep))) => {
                prep.columns = parse_columns(&packets, usize::from(prep.columns_num))?;
            }
            (
                PendingKind::ExecuteColumns,
                Some(Partial::Execute {
                    column_count,
                    columns,
                    ..
                }),
            ) => {
                let expected = column_count
                    .and_then(|c| usize::try_from(c).ok())
                    .unwrap_or_default();
                *columns = parse_columns(&packets, expected)?;
            }
            (PendingKind::ExecuteRows, Some(Partial::Execute { columns, rows, .. })) => {
                for payload in &packets {
                    rows.push(decode_binary_row(payload, columns, charset)?);
                }
                tracing::debug!(rows = rows.len(), "Result set complete");
            }
            (kind, _) => {
                return Err(violation(format!("EOF for {:?} without matching state", kind)));
            }
        }

        self.after_pop(entry.ticket);
        Ok(())
    }

    /// Complete `ticket` once its last entry has been popped.
    fn after_pop(&mut self, ticket: Ticket) {
        if self.callback_queue.front().is_some_and(|p| p.ticket == ticket) {
            return;
        }
        let completion = match self.partial.take() {
            Some(Partial::Prepare(prep)) => Ok(Completion::Prepared(prep)),
            Some(Partial::Execute { columns, rows, .. }) => {
                Ok(Completion::Executed(ExecuteResult::Rows(ResultSet { columns, rows })))
            }
            None => Err(violation("reply finished without a result")),
        };
        self.complete(ticket, completion);
    }

    /// Resolve the front ticket now, dropping its remaining entries.
    fn resolve_front(&mut self, result: Result<Completion>) {
        let Some(ticket) = self.callback_queue.front().map(|p| p.ticket) else {
            return;
        };
        while self.callback_queue.front().is_some_and(|p| p.ticket == ticket) {
            self.callback_queue.pop_front();
        }
        self.recv_queue.clear();
        self.partial = None;
        self.complete(ticket, result);
    }

    fn complete(&mut self, ticket: Ticket, result: Result<Completion>) {
        self.completions.insert(ticket, result);
        self.reply_started = false;
        if self.callback_queue.is_empty() && self.state == EngineState::AwaitingResponse {
            self.state = EngineState::Idle;
        }
    }
}

fn parse_columns(packets: &[Vec<u8>], expected: usize) -> Result<Vec<ColumnDef>> {
    if packets.len() != expected {
        return Err(Error::protocol(format!(
            "expected {} column definitions, got {}",
            expected,
            packets.len()
        )));
    }
    packets.iter().map(|p| ColumnDef::parse(p)).collect()
}
