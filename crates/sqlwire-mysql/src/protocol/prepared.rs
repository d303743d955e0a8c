//! MySQL prepared statement (binary protocol) packets.
//!
//! This module builds COM_STMT_PREPARE, COM_STMT_EXECUTE and COM_STMT_CLOSE
//! payloads and parses the COM_STMT_PREPARE_OK reply.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: Client sends COM_STMT_PREPARE with SQL
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any), then EOF
//!    - Server sends result column definitions (if any), then EOF
//!
//! 2. **Execute**: Client sends COM_STMT_EXECUTE with statement ID + binary params
//!    - Server returns a binary result set or an OK packet
//!
//! 3. **Close**: Client sends COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! # References
//!
//! - [COM_STMT_PREPARE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
//! - [COM_STMT_EXECUTE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_execute.html)

use sqlwire_core::{ByteCursor, Error, Result, Value, WidthPolicy};

use super::codec::WireCodec;
use super::{Command, payload_cursor};
use crate::config::Charset;
use crate::types::FieldType;

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

impl PrepareOk {
    /// Parse a COM_STMT_PREPARE_OK payload.
    ///
    /// Layout: status 0x00, statement id (4), columns (2), params (2),
    /// reserved (1), warnings (2).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        let status = cursor.read_u8()?;
        if status != 0x00 {
            return Err(Error::protocol_with_data(
                format!("COM_STMT_PREPARE_OK must start with 0x00, got 0x{:02X}", status),
                payload,
            ));
        }
        let statement_id = cursor.read_u32_le()?;
        let num_columns = cursor.read_u16_le()?;
        let num_params = cursor.read_u16_le()?;
        cursor.skip(1)?;
        let warnings = if cursor.remaining() >= 2 {
            cursor.read_u16_le()?
        } else {
            0
        };
        Ok(Self {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }

    /// Encode as a COM_STMT_PREPARE_OK payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = ByteCursor::with_capacity(12);
        cursor.write_u8(0x00);
        cursor.write(&self.statement_id.to_le_bytes());
        cursor.write(&self.num_columns.to_le_bytes());
        cursor.write(&self.num_params.to_le_bytes());
        cursor.write_u8(0x00);
        cursor.write(&self.warnings.to_le_bytes());
        cursor.into_vec()
    }
}

/// Build a COM_STMT_PREPARE payload.
pub fn build_stmt_prepare_packet(sql: &str, charset: Charset) -> Result<Vec<u8>> {
    let encoded = charset.encode(sql)?;
    let mut cursor = ByteCursor::with_capacity(1 + encoded.len());
    cursor.write_u8(Command::StmtPrepare as u8);
    cursor.write(&encoded);
    Ok(cursor.into_vec())
}

/// Build a COM_STMT_EXECUTE payload.
///
/// Layout: command, statement id, cursor flag (0 = no cursor), iteration
/// count (1), then for a non-empty parameter list the NULL bitmap, the
/// new-params-bound flag (1), a type/flag pair per parameter and the
/// non-NULL values.
pub fn build_stmt_execute_packet(
    statement_id: u32,
    params: &[Value],
    charset: Charset,
) -> Result<Vec<u8>> {
    let mut cursor =
        ByteCursor::with_capacity(16 + params.len() * 16).width_policy(WidthPolicy::Doubling);

    cursor.write_u8(Command::StmtExecute as u8);
    cursor.write(&statement_id.to_le_bytes());
    cursor.write_u8(0x00);
    cursor.write(&1u32.to_le_bytes());

    if params.is_empty() {
        return Ok(cursor.into_vec());
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    cursor.write(&null_bitmap);
    cursor.write_u8(1);

    for param in params {
        cursor.write_u8(param_type(param) as u8);
        cursor.write_u8(0x00);
    }

    for param in params {
        encode_param(&mut cursor, param, charset)?;
    }

    Ok(cursor.into_vec())
}

/// Build a COM_STMT_CLOSE payload. The server does not reply.
#[cfg(feature = "teardown")]
pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut cursor = ByteCursor::with_capacity(5);
    cursor.write_u8(Command::StmtClose as u8);
    cursor.write(&statement_id.to_le_bytes());
    cursor.into_vec()
}

/// Wire type announced for a parameter.
fn param_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) => FieldType::Tiny,
        Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
            let width = value
                .as_i64()
                .map_or(8, |v| WidthPolicy::Doubling.signed_width(v));
            match width {
                1 => FieldType::Tiny,
                2 => FieldType::Short,
                4 => FieldType::Long,
                _ => FieldType::LongLong,
            }
        }
        Value::Float(_) | Value::Double(_) => FieldType::Double,
        Value::Decimal(_) => FieldType::NewDecimal,
        Value::Text(_) | Value::DateTime(_) | Value::Time(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
        Value::Json(_) => FieldType::Json,
    }
}

/// Encode one parameter value. NULLs live only in the bitmap.
fn encode_param(cursor: &mut ByteCursor, value: &Value, charset: Charset) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => cursor.write_u8(u8::from(*b)),
        Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
            let v = value.as_i64().unwrap_or_default();
            cursor.write_int_le(v, None)?;
        }
        Value::Float(f) => cursor.write(&f64::from(*f).to_le_bytes()),
        Value::Double(f) => cursor.write(&f.to_le_bytes()),
        Value::Decimal(s) => cursor.write_string_lenenc(s),
        Value::Text(s) => cursor.write_lenenc_bytes(&charset.encode(s)?),
        Value::Bytes(b) => cursor.write_lenenc_bytes(b),
        Value::DateTime(dt) => cursor.write_string_lenenc(&dt.to_string()),
        Value::Time(_) => cursor.write_string_lenenc(&value.to_string()),
        Value::Json(j) => cursor.write_lenenc_bytes(&charset.encode(&j.to_string())?),
    }
    Ok(())
}
