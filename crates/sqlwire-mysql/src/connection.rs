//! Blocking MySQL connection over `std::net::TcpStream`.
//!
//! Drives a [`ProtocolEngine`]: every call flushes queued bytes, then reads
//! from the socket until the requested ticket resolves. Commands can be
//! pipelined with [`MySqlConnection::send_prepare`] /
//! [`MySqlConnection::send_execute`] followed by [`MySqlConnection::wait`].

use std::io::{Read, Write};
use std::net::TcpStream;

use sqlwire_core::error::{ConnectionError, ConnectionErrorKind};
use sqlwire_core::{Error, Result, Value};

use crate::config::MySqlConfig;
use crate::engine::{Completion, EngineState, ProtocolEngine, Ticket};
use crate::result::{ExecuteResult, PrepareResult};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Blocking MySQL connection.
pub struct MySqlConnection {
    stream: TcpStream,
    engine: ProtocolEngine,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.engine.config();
        f.debug_struct("MySqlConnection")
            .field("state", &self.engine.state())
            .field("connection_id", &self.engine.connection_id())
            .field("host", &config.host)
            .field("port", &config.port)
            .field("database", &config.database)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a new connection to the MySQL server.
    ///
    /// This performs the complete connection handshake:
    /// 1. TCP connection (each resolved address in turn)
    /// 2. Receive server handshake
    /// 3. Send login response
    /// 4. Handle auth result (possibly auth switch or RSA key exchange)
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        let stream = connect_tcp(&config)?;
        stream.set_nodelay(true).ok();
        // The connect timeout also bounds the handshake
        stream.set_read_timeout(Some(config.connect_timeout)).ok();

        let mut conn = Self {
            stream,
            engine: ProtocolEngine::new(config),
            read_buf: vec![0; READ_BUFFER_SIZE],
        };
        let ticket = conn.engine.on_connected()?;
        match conn.wait(ticket) {
            Ok(_) => {}
            Err(Error::Connection(e)) if e.kind == ConnectionErrorKind::Disconnected => {
                if let Some(io) = e
                    .source
                    .as_ref()
                    .and_then(|s| s.downcast_ref::<std::io::Error>())
                {
                    if matches!(
                        io.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) {
                        return Err(Error::Timeout);
                    }
                }
                return Err(Error::Connection(e));
            }
            Err(e) => return Err(e),
        }
        conn.stream.set_read_timeout(None).ok();

        tracing::debug!(
            server_version = conn.server_version().unwrap_or(""),
            connection_id = conn.connection_id(),
            "Connected to MySQL"
        );
        Ok(conn)
    }

    /// Get the current engine state.
    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    /// Get the server version.
    pub fn server_version(&self) -> Option<&str> {
        self.engine.server_version()
    }

    /// Get the connection ID.
    pub fn connection_id(&self) -> u32 {
        self.engine.connection_id().unwrap_or(0)
    }

    /// Prepare a statement and wait for its metadata.
    pub fn prepare(&mut self, sql: &str) -> Result<PrepareResult> {
        let ticket = self.send_prepare(sql)?;
        self.wait(ticket)?.into_prepared()
    }

    /// Execute a prepared statement and wait for its result.
    pub fn execute(&mut self, stmt: &PrepareResult, params: &[Value]) -> Result<ExecuteResult> {
        let ticket = self.send_execute(stmt, params)?;
        self.wait(ticket)?.into_executed()
    }

    /// Send `COM_STMT_PREPARE` without waiting for the reply.
    pub fn send_prepare(&mut self, sql: &str) -> Result<Ticket> {
        let ticket = self.engine.prepare(sql)?;
        self.flush()?;
        Ok(ticket)
    }

    /// Send `COM_STMT_EXECUTE` without waiting for the reply.
    pub fn send_execute(&mut self, stmt: &PrepareResult, params: &[Value]) -> Result<Ticket> {
        let ticket = self.engine.execute(stmt, params)?;
        self.flush()?;
        Ok(ticket)
    }

    /// Block until `ticket` resolves.
    ///
    /// Replies to earlier tickets that arrive meanwhile are kept and can be
    /// collected with their own `wait` call.
    pub fn wait(&mut self, ticket: Ticket) -> Result<Completion> {
        loop {
            if let Some(result) = self.engine.take_completion(ticket) {
                return result;
            }
            if !self.engine.is_pending(ticket) {
                return Err(Error::protocol(format!(
                    "ticket {} is unknown or was already collected",
                    ticket
                )));
            }

            let n = self
                .stream
                .read(&mut self.read_buf)
                .map_err(|e| disconnected("Failed to read from server", e))?;
            if n == 0 {
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: "Server closed the connection".to_string(),
                    source: None,
                }));
            }
            self.engine.receive(&self.read_buf[..n])?;
            self.flush()?;
        }
    }

    /// Deallocate a prepared statement on the server.
    #[cfg(feature = "teardown")]
    pub fn close_statement(&mut self, stmt: &PrepareResult) -> Result<()> {
        self.engine.close_statement(stmt)?;
        self.flush()
    }

    /// Send `COM_QUIT` and drop the connection.
    #[cfg(feature = "teardown")]
    pub fn close(mut self) -> Result<()> {
        self.engine.quit()?;
        self.flush()?;
        self.stream.shutdown(std::net::Shutdown::Both).ok();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let out = self.engine.take_outbound();
        if out.is_empty() {
            return Ok(());
        }
        self.stream
            .write_all(&out)
            .map_err(|e| disconnected("Failed to write to server", e))?;
        self.stream
            .flush()
            .map_err(|e| disconnected("Failed to flush stream", e))
    }
}

fn connect_tcp(config: &MySqlConfig) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in config.resolve()? {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) if e.kind() == std::io::ErrorKind::TimedOut => Error::Timeout,
        Some(e) => connect_error(config, e),
        None => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::DnsResolution,
            message: format!("No addresses found for {}", config.socket_addr()),
            source: None,
        }),
    })
}

pub(crate) fn connect_error(config: &MySqlConfig, e: std::io::Error) -> Error {
    let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
        source: Some(Box::new(e)),
    })
}

pub(crate) fn disconnected(context: &str, e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    })
}
