//! Shared primitives for the sqlwire crates.
//!
//! - `ByteCursor`: growable byte buffer with fixed-width integer and string codecs
//! - `Value` and `Row`: dynamically typed results and parameters
//! - `Error`: the error type every sqlwire operation returns

pub mod cursor;
pub mod error;
pub mod row;
pub mod value;

pub use cursor::{ByteCursor, CursorError, Strictness, WidthPolicy};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{DateTime, Value};
