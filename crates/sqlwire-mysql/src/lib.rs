//! MySQL binary-protocol client for sqlwire.
//!
//! This crate speaks the MySQL client/server protocol from scratch on top of
//! the `sqlwire-core` byte cursor. It provides:
//!
//! - Packet framing with sequence ids and split-payload reassembly
//! - Authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password, auth switch)
//! - Prepared statements: COM_STMT_PREPARE and COM_STMT_EXECUTE
//! - Binary result set decoding into typed values
//! - A sans-IO [`ProtocolEngine`] with pipelined, ticketed commands
//! - Blocking and asupersync connections that drive the engine
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlwire_core::Value;
//! use sqlwire_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let stmt = conn.prepare("SELECT ? AS x")?;
//! let result = conn.execute(&stmt, &[Value::BigInt(42)])?;
//! ```

pub mod async_connection;
pub mod auth;
pub mod config;
pub mod connection;
pub mod engine;
pub mod protocol;
pub mod result;
pub mod types;

pub use async_connection::MySqlAsyncConnection;
pub use auth::AuthPlugin;
pub use config::{Charset, MySqlConfig};
pub use connection::MySqlConnection;
pub use engine::{Completion, EngineState, ProtocolEngine, Ticket};
pub use result::{ExecuteResult, OkSummary, PrepareResult, ResultSet};
pub use types::{ColumnDef, FieldType};
