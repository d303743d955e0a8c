//! MySQL type system and binary result decoding.
//!
//! This module provides:
//! - MySQL field type codes and column flags
//! - Column definition parsing
//! - `ValueDecoder`, resolved once per column, which turns binary-protocol
//!   bytes into `Value`s
//! - Binary row decoding (NULL bitmap + values)

#![allow(clippy::cast_possible_truncation)]

use sqlwire_core::{ByteCursor, DateTime, Error, Result, Value};

use crate::config::Charset;
use crate::protocol::codec::WireCodec;
use crate::protocol::{charset, payload_cursor};

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE) - internal use
    NewDate = 0x0E,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// TIMESTAMP2 (MYSQL_TYPE_TIMESTAMP2)
    Timestamp2 = 0x11,
    /// DATETIME2 (MYSQL_TYPE_DATETIME2)
    DateTime2 = 0x12,
    /// TIME2 (MYSQL_TYPE_TIME2)
    Time2 = 0x13,
    /// JSON (MYSQL_TYPE_JSON)
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from its wire code.
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            other => {
                return Err(Error::protocol(format!(
                    "unknown column type code 0x{:02X}",
                    other
                )));
            }
        })
    }

    /// Get the type name as a string.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
}

/// Per-column binary decoder, one variant per wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDecoder {
    /// Length-encoded text in the session charset
    Text,
    /// Length-encoded raw bytes
    Bytes,
    /// Length-encoded decimal digits, kept exact
    Decimal,
    /// Length-encoded JSON document
    Json,
    /// 8-byte integer
    LongLong { unsigned: bool },
    /// 4-byte integer (also INT24)
    Long { unsigned: bool },
    /// 2-byte integer (also YEAR)
    Short { unsigned: bool },
    /// 1-byte integer
    Tiny { unsigned: bool },
    /// IEEE754 8-byte float
    Double,
    /// IEEE754 4-byte float
    Float,
    /// Length-prefixed date/datetime/timestamp
    DateTime,
    /// Length-prefixed time/duration
    Time,
    /// No bytes on the wire
    Null,
}

impl ValueDecoder {
    /// Pick the decoder for a column's type, flags and charset.
    pub fn for_column(field_type: FieldType, flags: u16, charset_id: u16) -> Self {
        let unsigned = flags & column_flags::UNSIGNED != 0;
        let binary = charset_id == u16::from(charset::BINARY);
        match field_type {
            FieldType::LongLong => ValueDecoder::LongLong { unsigned },
            FieldType::Long | FieldType::Int24 => ValueDecoder::Long { unsigned },
            FieldType::Short => ValueDecoder::Short { unsigned },
            FieldType::Year => ValueDecoder::Short { unsigned: true },
            FieldType::Tiny => ValueDecoder::Tiny { unsigned },
            FieldType::Double => ValueDecoder::Double,
            FieldType::Float => ValueDecoder::Float,
            FieldType::Null => ValueDecoder::Null,
            FieldType::Decimal | FieldType::NewDecimal => ValueDecoder::Decimal,
            FieldType::Json => ValueDecoder::Json,
            FieldType::Date
            | FieldType::NewDate
            | FieldType::DateTime
            | FieldType::DateTime2
            | FieldType::Timestamp
            | FieldType::Timestamp2 => ValueDecoder::DateTime,
            FieldType::Time | FieldType::Time2 => ValueDecoder::Time,
            FieldType::Bit | FieldType::Geometry => ValueDecoder::Bytes,
            FieldType::TinyBlob
            | FieldType::MediumBlob
            | FieldType::LongBlob
            | FieldType::Blob
            | FieldType::VarChar
            | FieldType::VarString
            | FieldType::String
            | FieldType::Enum
            | FieldType::Set => {
                if binary {
                    ValueDecoder::Bytes
                } else {
                    ValueDecoder::Text
                }
            }
        }
    }

    /// Decode one non-NULL value at the cursor.
    pub fn decode(self, cursor: &mut ByteCursor, charset: Charset) -> Result<Value> {
        match self {
            ValueDecoder::Text => Ok(Value::Text(charset.decode(&read_lenenc(cursor)?))),
            ValueDecoder::Bytes => Ok(Value::Bytes(read_lenenc(cursor)?)),
            ValueDecoder::Decimal => Ok(Value::Decimal(
                String::from_utf8_lossy(&read_lenenc(cursor)?).into_owned(),
            )),
            ValueDecoder::Json => {
                let bytes = read_lenenc(cursor)?;
                serde_json::from_slice(&bytes).map(Value::Json).map_err(|e| {
                    Error::Protocol(sqlwire_core::ProtocolError {
                        message: format!("invalid JSON column value: {}", e),
                        raw_data: Some(bytes),
                        source: Some(Box::new(e)),
                    })
                })
            }
            ValueDecoder::LongLong { unsigned: true } => {
                Ok(Value::from_u64(cursor.read_uint_le(8)?))
            }
            ValueDecoder::LongLong { unsigned: false } => {
                Ok(Value::BigInt(cursor.read_int_le(8)?))
            }
            ValueDecoder::Long { unsigned: true } => Ok(Value::BigInt(cursor.read_uint_le(4)? as i64)),
            ValueDecoder::Long { unsigned: false } => Ok(Value::Int(cursor.read_int_le(4)? as i32)),
            ValueDecoder::Short { unsigned: true } => Ok(Value::Int(cursor.read_uint_le(2)? as i32)),
            ValueDecoder::Short { unsigned: false } => {
                Ok(Value::SmallInt(cursor.read_int_le(2)? as i16))
            }
            ValueDecoder::Tiny { unsigned: true } => {
                Ok(Value::SmallInt(cursor.read_uint_le(1)? as i16))
            }
            ValueDecoder::Tiny { unsigned: false } => Ok(Value::TinyInt(cursor.read_int_le(1)? as i8)),
            ValueDecoder::Double => Ok(Value::Double(f64::from_bits(cursor.read_uint_le(8)?))),
            ValueDecoder::Float => Ok(Value::Float(f32::from_bits(
                cursor.read_uint_le(4)? as u32,
            ))),
            ValueDecoder::DateTime => decode_datetime(cursor).map(Value::DateTime),
            ValueDecoder::Time => decode_time(cursor).map(Value::Time),
            ValueDecoder::Null => Ok(Value::Null),
        }
    }
}

fn read_lenenc(cursor: &mut ByteCursor) -> Result<Vec<u8>> {
    cursor
        .read_lenenc_bytes()?
        .ok_or_else(|| Error::protocol("unexpected NULL marker inside a binary row"))
}

/// Decode a binary DATE/DATETIME/TIMESTAMP value.
///
/// The length byte selects how much of the zero date is filled in:
/// 0 nothing, 4 the date, 7 the date and time, 11 adds microseconds.
fn decode_datetime(cursor: &mut ByteCursor) -> Result<DateTime> {
    let len = cursor.read_u8()?;
    let mut dt = DateTime::default();
    if len == 0 {
        return Ok(dt);
    }
    if !matches!(len, 4 | 7 | 11) {
        return Err(Error::protocol(format!("invalid date value length {}", len)));
    }
    dt.year = cursor.read_uint_le(2)? as u16;
    dt.month = cursor.read_u8()?;
    dt.day = cursor.read_u8()?;
    if len >= 7 {
        dt.hour = cursor.read_u8()?;
        dt.minute = cursor.read_u8()?;
        dt.second = cursor.read_u8()?;
    }
    if len == 11 {
        dt.microsecond = cursor.read_uint_le(4)? as u32;
    }
    Ok(dt)
}

/// Decode a binary TIME value into signed microseconds.
///
/// Length 0 is zero, 8 carries sign/days/h/m/s, 12 adds microseconds.
fn decode_time(cursor: &mut ByteCursor) -> Result<i64> {
    let len = cursor.read_u8()?;
    if len == 0 {
        return Ok(0);
    }
    if !matches!(len, 8 | 12) {
        return Err(Error::protocol(format!("invalid time value length {}", len)));
    }
    let negative = cursor.read_u8()? == 1;
    let days = cursor.read_uint_le(4)? as i64;
    let hours = i64::from(cursor.read_u8()?) + days * 24;
    let minutes = i64::from(cursor.read_u8()?);
    let seconds = i64::from(cursor.read_u8()?);
    let micros = if len == 12 {
        cursor.read_uint_le(4)? as i64
    } else {
        0
    };
    let total = ((hours * 60 + minutes) * 60 + seconds) * 1_000_000 + micros;
    Ok(if negative { -total } else { total })
}

/// Column definition from a result set.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Character set number
    pub charset: u16,
    /// Column length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
    decoder: ValueDecoder,
}

impl ColumnDef {
    /// Build a column definition in code (used for scripted servers and tests).
    pub fn new(name: impl Into<String>, column_type: FieldType) -> Self {
        let name = name.into();
        let charset_id = u16::from(charset::UTF8MB4_GENERAL_CI);
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            charset: charset_id,
            column_length: 0,
            column_type,
            flags: 0,
            decimals: 0,
            decoder: ValueDecoder::for_column(column_type, 0, charset_id),
        }
    }

    /// Set flags and character set, re-resolving the decoder.
    pub fn with_flags(mut self, flags: u16, charset_id: u16) -> Self {
        self.flags = flags;
        self.charset = charset_id;
        self.decoder = ValueDecoder::for_column(self.column_type, flags, charset_id);
        self
    }

    /// Parse a column definition packet (protocol 4.1).
    ///
    /// Six length-encoded strings, the length-encoded size of the fixed
    /// block (0x0C), then charset (2), length (4), type (1), flags (2),
    /// decimals (1) and two filler bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        let mut text = || -> Result<String> {
            Ok(cursor.read_lenenc_string()?.unwrap_or_default())
        };
        let catalog = text()?;
        let schema = text()?;
        let table = text()?;
        let org_table = text()?;
        let name = text()?;
        let org_name = text()?;

        let fixed_len = cursor.read_lenenc_int()?.unwrap_or(0);
        if fixed_len < 10 {
            return Err(Error::protocol_with_data(
                format!("column definition fixed block too short ({} bytes)", fixed_len),
                payload,
            ));
        }
        let charset_id = cursor.read_u16_le()?;
        let column_length = cursor.read_u32_le()?;
        let column_type = FieldType::from_u8(cursor.read_u8()?)?;
        let flags = cursor.read_u16_le()?;
        let decimals = cursor.read_u8()?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset: charset_id,
            column_length,
            column_type,
            flags,
            decimals,
            decoder: ValueDecoder::for_column(column_type, flags, charset_id),
        })
    }

    /// Encode as a column definition packet payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = ByteCursor::with_capacity(64);
        for s in [
            &self.catalog,
            &self.schema,
            &self.table,
            &self.org_table,
            &self.name,
            &self.org_name,
        ] {
            cursor.write_string_lenenc(s);
        }
        cursor.write_lenenc_int(0x0C);
        cursor.write(&self.charset.to_le_bytes());
        cursor.write(&self.column_length.to_le_bytes());
        cursor.write_u8(self.column_type as u8);
        cursor.write(&self.flags.to_le_bytes());
        cursor.write_u8(self.decimals);
        cursor.write_zeros(2);
        cursor.into_vec()
    }

    /// The decoder resolved for this column.
    pub fn decoder(&self) -> ValueDecoder {
        self.decoder
    }

    /// Check if the column is NOT NULL.
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    /// Check if the column is a primary key.
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Check if the column is unsigned.
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is auto-increment.
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }
}

/// Size of the NULL bitmap in a binary row with `columns` columns.
pub const fn row_null_bitmap_len(columns: usize) -> usize {
    (columns + 2 + 7) / 8
}

/// Decode a binary-protocol row.
///
/// Layout: 0x00 header, NULL bitmap with a 2-bit offset (bit `i + 2` set
/// means column `i` is NULL), then the non-NULL values in column order.
pub fn decode_binary_row(
    payload: &[u8],
    columns: &[ColumnDef],
    charset: Charset,
) -> Result<Vec<Value>> {
    let mut cursor = payload_cursor(payload);
    let header = cursor.read_u8()?;
    if header != 0x00 {
        return Err(Error::protocol_with_data(
            format!("binary row must start with 0x00, got 0x{:02X}", header),
            payload,
        ));
    }
    let bitmap = cursor.read(row_null_bitmap_len(columns.len()))?.to_vec();

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
        } else {
            values.push(column.decoder().decode(&mut cursor, charset)?);
        }
    }
    Ok(values)
}
