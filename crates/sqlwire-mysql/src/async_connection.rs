//! Async MySQL connection built on asupersync's TCP stream.
//!
//! The same [`ProtocolEngine`] as the blocking connection does all protocol
//! work; this type only moves bytes. Every operation checks the [`Cx`] for
//! cancellation before touching the socket and reports it as
//! [`Outcome::Cancelled`].

use std::io;
use std::net::SocketAddr;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use asupersync::{Cx, Outcome};

use sqlwire_core::error::{ConnectionError, ConnectionErrorKind};
use sqlwire_core::{Error, Value};

use crate::config::MySqlConfig;
use crate::connection::{connect_error, disconnected};
use crate::engine::{Completion, EngineState, ProtocolEngine, Ticket};
use crate::result::{ExecuteResult, PrepareResult};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Async MySQL connection.
pub struct MySqlAsyncConnection {
    stream: TcpStream,
    engine: ProtocolEngine,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for MySqlAsyncConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.engine.config();
        f.debug_struct("MySqlAsyncConnection")
            .field("state", &self.engine.state())
            .field("connection_id", &self.engine.connection_id())
            .field("host", &config.host)
            .field("port", &config.port)
            .finish_non_exhaustive()
    }
}

impl MySqlAsyncConnection {
    /// Connect and authenticate.
    ///
    /// `config.connect_timeout` bounds each TCP connect attempt. The
    /// handshake itself is bounded only by cancellation of `cx`.
    ///
    /// A hostname is resolved with the blocking system resolver on the
    /// current thread before connecting; an IP address skips the lookup.
    pub async fn connect(cx: &Cx, config: MySqlConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let addrs = match config.resolve() {
            Ok(addrs) => addrs,
            Err(e) => return Outcome::Err(e),
        };
        let stream = match connect_tcp(&config, &addrs).await {
            Ok(s) => s,
            Err(e) => return Outcome::Err(e),
        };
        stream.set_nodelay(true).ok();

        let mut conn = Self {
            stream,
            engine: ProtocolEngine::new(config),
            read_buf: vec![0; READ_BUFFER_SIZE],
        };
        let ticket = match conn.engine.on_connected() {
            Ok(t) => t,
            Err(e) => return Outcome::Err(e),
        };
        match conn.wait(cx, ticket).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        tracing::debug!(
            server_version = conn.engine.server_version().unwrap_or(""),
            connection_id = conn.connection_id(),
            "Connected to MySQL (async)"
        );
        Outcome::Ok(conn)
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
    pub async fn prepare(&mut self, cx: &Cx, sql: &str) -> Outcome<PrepareResult, Error> {
        let ticket = match self.send_prepare(cx, sql).await {
            Outcome::Ok(t) => t,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.wait(cx, ticket).await {
            Outcome::Ok(done) => outcome(done.into_prepared()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Execute a prepared statement and wait for its result.
    pub async fn execute(
        &mut self,
        cx: &Cx,
        stmt: &PrepareResult,
        params: &[Value],
    ) -> Outcome<ExecuteResult, Error> {
        let ticket = match self.send_execute(cx, stmt, params).await {
            Outcome::Ok(t) => t,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.wait(cx, ticket).await {
            Outcome::Ok(done) => outcome(done.into_executed()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Send `COM_STMT_PREPARE` without waiting for the reply.
    pub async fn send_prepare(&mut self, cx: &Cx, sql: &str) -> Outcome<Ticket, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let ticket = match self.engine.prepare(sql) {
            Ok(t) => t,
            Err(e) => return Outcome::Err(e),
        };
        match self.flush().await {
            Ok(()) => Outcome::Ok(ticket),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Send `COM_STMT_EXECUTE` without waiting for the reply.
    pub async fn send_execute(
        &mut self,
        cx: &Cx,
        stmt: &PrepareResult,
        params: &[Value],
    ) -> Outcome<Ticket, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let ticket = match self.engine.execute(stmt, params) {
            Ok(t) => t,
            Err(e) => return Outcome::Err(e),
        };
        match self.flush().await {
            Ok(()) => Outcome::Ok(ticket),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Read until `ticket` resolves.
    ///
    /// Cancellation is observed between reads. A cancelled wait leaves the
    /// reply unread; the ticket stays pending and can be waited on again.
    pub async fn wait(&mut self, cx: &Cx, ticket: Ticket) -> Outcome<Completion, Error> {
        loop {
            if let Some(result) = self.engine.take_completion(ticket) {
                return outcome(result);
            }
            if !self.engine.is_pending(ticket) {
                return Outcome::Err(Error::protocol(format!(
                    "ticket {} is unknown or was already collected",
                    ticket
                )));
            }
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }

            let n = match read_some(&mut self.stream, &mut self.read_buf).await {
                Ok(0) => {
                    return Outcome::Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: "Server closed the connection".to_string(),
                        source: None,
                    }));
                }
                Ok(n) => n,
                Err(e) => return Outcome::Err(read_error(e)),
            };
            if let Err(e) = self.engine.receive(&self.read_buf[..n]) {
                return Outcome::Err(e);
            }
            if let Err(e) = self.flush().await {
                return Outcome::Err(e);
            }
        }
    }

    /// Deallocate a prepared statement on the server.
    #[cfg(feature = "teardown")]
    pub async fn close_statement(&mut self, cx: &Cx, stmt: &PrepareResult) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if let Err(e) = self.engine.close_statement(stmt) {
            return Outcome::Err(e);
        }
        outcome(self.flush().await)
    }

    /// Send `COM_QUIT` and drop the connection.
    #[cfg(feature = "teardown")]
    pub async fn close(mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if let Err(e) = self.engine.quit() {
            return Outcome::Err(e);
        }
        outcome(self.flush().await)
    }

    async fn flush(&mut self) -> Result<(), Error> {
        let out = self.engine.take_outbound();
        if out.is_empty() {
            return Ok(());
        }
        write_all(&mut self.stream, &out)
            .await
            .map_err(|e| disconnected("Failed to write to server", e))?;
        std::future::poll_fn(|cx| std::pin::Pin::new(&mut self.stream).poll_flush(cx))
            .await
            .map_err(|e| disconnected("Failed to flush stream", e))
    }
}

async fn connect_tcp(config: &MySqlConfig, addrs: &[SocketAddr]) -> Result<TcpStream, Error> {
    let mut last_err = None;
    for &addr in addrs {
        match TcpStream::connect_timeout(addr, config.connect_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => Error::Timeout,
        Some(e) => connect_error(config, e),
        None => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::DnsResolution,
            message: format!("No addresses found for {}", config.socket_addr()),
            source: None,
        }),
    })
}

fn outcome<T>(result: Result<T, Error>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

fn read_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
        _ => disconnected("Failed to read from server", e),
    }
}

async fn read_some(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut read_buf = ReadBuf::new(buf);
    std::future::poll_fn(|cx| std::pin::Pin::new(&mut *stream).poll_read(cx, &mut read_buf))
        .await?;
    Ok(read_buf.filled().len())
}

async fn write_all(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = std::future::poll_fn(|cx| {
            std::pin::Pin::new(&mut *stream).poll_write(cx, &buf[written..])
        })
        .await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "connection closed",
            ));
        }
        written += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::net::TcpListener;

    #[test]
    fn test_async_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let config = MySqlConfig::new().host("127.0.0.1").port(port);
            match MySqlAsyncConnection::connect(&cx, config).await {
                Outcome::Err(e) => assert!(e.is_connection_error()),
                Outcome::Ok(_) => panic!("connected to a closed port"),
                Outcome::Cancelled(r) => panic!("cancelled: {:?}", r),
                Outcome::Panicked(p) => panic!("panicked: {:?}", p),
            }
        });
    }

    #[test]
    fn test_read_error_mapping() {
        let timeout = read_error(io::Error::new(io::ErrorKind::WouldBlock, "slow"));
        assert!(matches!(timeout, Error::Timeout));
        let reset = read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(reset.is_connection_error());
    }
}
