//! MySQL wire protocol implementation.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets.

pub mod codec;
pub mod handshake;
pub mod packet;
pub mod prepared;

pub use codec::WireCodec;
pub use handshake::{AuthSwitchRequest, HandshakeInfo, build_login_packet};
pub use packet::{Packet, PacketAssembler, PacketHeader, SequenceCounter, frame_payload};
pub use prepared::{PrepareOk, build_stmt_execute_packet, build_stmt_prepare_packet};

use sqlwire_core::{ByteCursor, Error, QueryError, QueryErrorKind, Result, Strictness};

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities this client asks for.
    ///
    /// `CLIENT_DEPRECATE_EOF` is never requested: result-set segments are
    /// delimited by EOF packets.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
}

/// MySQL command codes (COM_xxx) used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Close prepared statement
    StmtClose = 0x19,
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
}

/// MySQL collation ids.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    /// The `binary` pseudo-charset marks BLOB/BINARY columns.
    pub const BINARY: u8 = 63;
}

/// Server response packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE with a payload shorter than 9 bytes)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Data packet (result set row, column definition, etc.)
    Data,
}

impl PacketType {
    /// Detect packet type from the first byte of payload.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }

    /// Classify a whole payload. An empty payload is data.
    pub fn of(payload: &[u8]) -> Self {
        payload
            .first()
            .map_or(PacketType::Data, |&b| Self::from_first_byte(b, payload.len()))
    }
}

/// Cursor over a received payload. Truncated fields are protocol errors.
pub(crate) fn payload_cursor(payload: &[u8]) -> ByteCursor {
    ByteCursor::from(payload).strictness(Strictness::Strict)
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human-readable info (may be empty)
    pub info: String,
}

impl OkPacket {
    /// Parse an OK packet, including its 0x00 marker.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        if cursor.peek() == Some(0x00) {
            cursor.skip(1)?;
        }
        let affected_rows = cursor.read_lenenc_int()?.unwrap_or(0);
        let last_insert_id = cursor.read_lenenc_int()?.unwrap_or(0);
        let status_flags = cursor.read_u16_le()?;
        let warnings = cursor.read_u16_le()?;
        let info = String::from_utf8_lossy(cursor.read_rest()).into_owned();
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters, empty if the server omitted it)
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// Parse an ERR packet, including its 0xFF marker.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        if cursor.peek() == Some(0xFF) {
            cursor.skip(1)?;
        }
        let error_code = cursor.read_u16_le()?;
        let sql_state = if cursor.peek() == Some(b'#') {
            cursor.skip(1)?;
            cursor.read_string(Some(5))?
        } else {
            String::new()
        };
        let error_message = String::from_utf8_lossy(cursor.read_rest()).into_owned();
        Ok(Self {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Classify the server error.
    pub fn kind(&self) -> QueryErrorKind {
        match self.error_code {
            1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1048 => QueryErrorKind::Constraint,
            1049 | 1051 | 1054 | 1146 | 1243 => QueryErrorKind::NotFound,
            1044 | 1045 | 1142 | 1143 | 1227 => QueryErrorKind::Permission,
            1205 | 1213 => QueryErrorKind::Deadlock,
            _ if self.sql_state.starts_with("42") => QueryErrorKind::Syntax,
            _ => QueryErrorKind::Database,
        }
    }

    /// Convert into the crate error type, attaching the statement text if known.
    pub fn into_error(self, sql: Option<String>) -> Error {
        Error::Query(QueryError {
            kind: self.kind(),
            code: Some(self.error_code),
            sqlstate: (!self.sql_state.is_empty()).then_some(self.sql_state),
            message: self.error_message,
            sql,
        })
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    /// Parse an EOF packet, including its 0xFE marker.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        if cursor.peek() == Some(0xFE) {
            cursor.skip(1)?;
        }
        // Pre-4.1 servers send a bare 0xFE
        if cursor.is_exhausted() {
            return Ok(Self::default());
        }
        Ok(Self {
            warnings: cursor.read_u16_le()?,
            status_flags: cursor.read_u16_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_detection() {
        assert_eq!(PacketType::from_first_byte(0x00, 10), PacketType::Ok);
        assert_eq!(PacketType::from_first_byte(0xFF, 10), PacketType::Error);
        assert_eq!(PacketType::from_first_byte(0xFE, 5), PacketType::Eof);
        assert_eq!(PacketType::from_first_byte(0xFE, 100), PacketType::Data);
        assert_eq!(
            PacketType::from_first_byte(0xFB, 10),
            PacketType::LocalInfile
        );
        assert_eq!(PacketType::from_first_byte(0x42, 10), PacketType::Data);
        assert_eq!(PacketType::of(&[]), PacketType::Data);
    }

    #[test]
    fn test_parse_ok_packet() {
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let ok = OkPacket::parse(&data).unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
        assert!(ok.info.is_empty());
    }

    #[test]
    fn test_parse_truncated_ok_packet() {
        assert!(matches!(
            OkPacket::parse(&[0x00, 0x01]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = ErrPacket::parse(&data).unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.error_message, "Access denied");
        assert_eq!(err.kind(), QueryErrorKind::Permission);
    }

    #[test]
    fn test_err_packet_into_error() {
        let mut data = vec![0xFF, 0x28, 0x04, b'#'];
        data.extend_from_slice(b"42000");
        data.extend_from_slice(b"You have an error in your SQL syntax");
        let err = ErrPacket::parse(&data)
            .unwrap()
            .into_error(Some("SELEC 1".to_string()));

        assert_eq!(err.server_code(), Some(1064));
        assert_eq!(err.sqlstate(), Some("42000"));
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sql.as_deref(), Some("SELEC 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_err_packet_without_sqlstate() {
        let mut data = vec![0xFF, 0x10, 0x04];
        data.extend_from_slice(b"Too many connections");
        let err = ErrPacket::parse(&data).unwrap();
        assert_eq!(err.error_code, 1040);
        assert!(err.sql_state.is_empty());
        assert_eq!(err.into_error(None).sqlstate(), None);
    }

    #[test]
    fn test_parse_eof_packet() {
        let eof = EofPacket::parse(&[0xFE, 0x01, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(eof.warnings, 1);
        assert_eq!(eof.status_flags, 2);
        assert_eq!(EofPacket::parse(&[0xFE]).unwrap(), EofPacket::default());
    }
}
