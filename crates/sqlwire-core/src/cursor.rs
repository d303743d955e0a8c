//! Growable byte buffer with an internal read/write position.
//!
//! `ByteCursor` is the one primitive shared by every wire codec in the
//! workspace. It provides:
//!
//! - Fixed-width integer codecs (1 to 8 bytes, little/big-endian,
//!   signed/unsigned) over the full 64-bit range
//! - NUL-terminated and length-prefixed string helpers
//! - Overwriting writes that grow the buffer on demand
//!
//! Reads are permissive by default: a request past the end of the buffer
//! returns whatever bytes remain, and missing integer bytes read as zero.
//! A cursor built with [`Strictness::Strict`] reports
//! [`CursorError::OutOfBounds`] instead.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

/// How the cursor reacts to reads past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Short reads return truncated data
    #[default]
    Permissive,
    /// Short reads fail with `CursorError::OutOfBounds`
    Strict,
}

/// Sizing policy used when an integer write does not name a byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WidthPolicy {
    /// Smallest of 1, 2, 3, ... 8 bytes
    #[default]
    Increment,
    /// Smallest of 1, 2, 4, 8 bytes
    Doubling,
}

impl WidthPolicy {
    /// Byte width used to store an unsigned value.
    pub fn unsigned_width(self, value: u64) -> usize {
        let mut width = 1;
        while width < 8 && value >> (8 * width) != 0 {
            width += 1;
        }
        self.round(width)
    }

    /// Byte width used to store a signed (two's complement) value.
    pub fn signed_width(self, value: i64) -> usize {
        let mut width = 1;
        while width < 8 && !fits_signed(value, width) {
            width += 1;
        }
        self.round(width)
    }

    fn round(self, width: usize) -> usize {
        match self {
            WidthPolicy::Increment => width,
            WidthPolicy::Doubling => width.next_power_of_two(),
        }
    }
}

fn fits_unsigned(value: u64, width: usize) -> bool {
    width >= 8 || value >> (8 * width) == 0
}

fn fits_signed(value: i64, width: usize) -> bool {
    if width >= 8 {
        return true;
    }
    let bits = 8 * width as u32;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

/// Errors reported by a [`ByteCursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// A strict read asked for more bytes than remain
    OutOfBounds {
        position: usize,
        requested: usize,
        available: usize,
    },
    /// Integer widths must be between 1 and 8 bytes
    InvalidWidth(usize),
    /// A strict write asked to store a value in too few bytes
    ValueOutOfRange { width: usize },
    /// A strict NUL-terminated read found no terminator
    MissingTerminator { position: usize },
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::OutOfBounds {
                position,
                requested,
                available,
            } => write!(
                f,
                "read of {} bytes at offset {} exceeds the {} bytes available",
                requested, position, available
            ),
            CursorError::InvalidWidth(width) => {
                write!(f, "integer width must be 1..=8 bytes, got {}", width)
            }
            CursorError::ValueOutOfRange { width } => {
                write!(f, "value does not fit in {} bytes", width)
            }
            CursorError::MissingTerminator { position } => {
                write!(f, "no NUL terminator after offset {}", position)
            }
        }
    }
}

impl std::error::Error for CursorError {}

fn check_width(width: usize) -> Result<(), CursorError> {
    if (1..=8).contains(&width) {
        Ok(())
    } else {
        Err(CursorError::InvalidWidth(width))
    }
}

/// A growable byte buffer with a single read/write position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteCursor {
    buf: Vec<u8>,
    pos: usize,
    strictness: Strictness,
    width_policy: WidthPolicy,
}

impl ByteCursor {
    /// Create an empty cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cursor with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Wrap existing bytes, positioned at the start.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            buf,
            ..Self::default()
        }
    }

    /// Wrap existing bytes, positioned at `pos`.
    pub fn with_position(buf: Vec<u8>, pos: usize) -> Self {
        Self {
            buf,
            pos,
            ..Self::default()
        }
    }

    /// Set the read strictness.
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Set the width policy used by integer writes without an explicit width.
    pub fn width_policy(mut self, policy: WidthPolicy) -> Self {
        self.width_policy = policy;
        self
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the position. Positions past the end are allowed; a later write
    /// zero-fills the gap.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Advance the position by `n` bytes, clamped to the end of the buffer.
    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.read(n).map(|_| ())
    }

    /// Total buffer length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the position and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Check if the position is at or past the end of the buffer.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// The whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Bytes from the position to the end.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    /// Consume the cursor and return the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    // === Reads ===

    /// Read `len` bytes, advancing to `min(pos + len, buffer length)`.
    pub fn read(&mut self, len: usize) -> Result<&[u8], CursorError> {
        let start = self.pos.min(self.buf.len());
        let available = self.buf.len() - start;
        if len > available && self.strictness == Strictness::Strict {
            return Err(CursorError::OutOfBounds {
                position: self.pos,
                requested: len,
                available,
            });
        }
        let end = start + len.min(available);
        self.pos = end;
        Ok(&self.buf[start..end])
    }

    /// Read everything from the position to the end.
    pub fn read_rest(&mut self) -> &[u8] {
        let start = self.pos.min(self.buf.len());
        self.pos = self.buf.len();
        &self.buf[start..]
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        self.read_uint_le(1).map(|v| v as u8)
    }

    /// Read an unsigned little-endian integer of `width` bytes.
    pub fn read_uint_le(&mut self, width: usize) -> Result<u64, CursorError> {
        check_width(width)?;
        let bytes = self.read(width)?;
        Ok(bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i))))
    }

    /// Read an unsigned big-endian integer of `width` bytes.
    pub fn read_uint_be(&mut self, width: usize) -> Result<u64, CursorError> {
        check_width(width)?;
        let bytes = self.read(width)?;
        let mut value = 0u64;
        for i in 0..width {
            value = (value << 8) | u64::from(bytes.get(i).copied().unwrap_or(0));
        }
        Ok(value)
    }

    /// Read a signed little-endian integer of `width` bytes.
    pub fn read_int_le(&mut self, width: usize) -> Result<i64, CursorError> {
        let raw = self.read_uint_le(width)?;
        Ok(sign_extend(raw, width))
    }

    /// Read a signed big-endian integer of `width` bytes.
    pub fn read_int_be(&mut self, width: usize) -> Result<i64, CursorError> {
        let raw = self.read_uint_be(width)?;
        Ok(sign_extend(raw, width))
    }

    /// Read bytes up to the first NUL and step past the terminator.
    ///
    /// In permissive mode a missing terminator yields the rest of the buffer.
    pub fn read_bytes_nul(&mut self) -> Result<&[u8], CursorError> {
        let start = self.pos.min(self.buf.len());
        match self.buf[start..].iter().position(|&b| b == 0) {
            Some(offset) => {
                self.pos = start + offset + 1;
                Ok(&self.buf[start..start + offset])
            }
            None if self.strictness == Strictness::Strict => {
                Err(CursorError::MissingTerminator { position: start })
            }
            None => Ok(self.read_rest()),
        }
    }

    /// Read a string.
    ///
    /// With `Some(len)` exactly `len` bytes are read; with `None` the string
    /// runs to the first NUL byte, which is consumed.
    pub fn read_string(&mut self, len: Option<usize>) -> Result<String, CursorError> {
        let bytes = match len {
            Some(len) => self.read(len)?,
            None => self.read_bytes_nul()?,
        };
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    // === Writes ===

    /// Write bytes at the position, overwriting and growing as needed.
    pub fn write(&mut self, bytes: &[u8]) {
        let start = self.pos;
        let end = start + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(bytes);
        self.pos = end;
    }

    /// Write bytes at `offset`; the position ends just after them.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.pos = offset;
        self.write(bytes);
    }

    /// Append bytes at the end of the buffer; the position ends there.
    pub fn append(&mut self, bytes: &[u8]) {
        self.pos = self.buf.len();
        self.write(bytes);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    /// Write `count` zero bytes.
    pub fn write_zeros(&mut self, count: usize) {
        let end = self.pos + count;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].fill(0);
        self.pos = end;
    }

    /// Write an unsigned little-endian integer.
    ///
    /// Without a width the cursor's `WidthPolicy` picks the smallest one.
    pub fn write_uint_le(&mut self, value: u64, width: Option<usize>) -> Result<(), CursorError> {
        let width = self.unsigned_width(value, width)?;
        let bytes = value.to_le_bytes();
        self.write(&bytes[..width]);
        Ok(())
    }

    /// Write an unsigned big-endian integer.
    pub fn write_uint_be(&mut self, value: u64, width: Option<usize>) -> Result<(), CursorError> {
        let width = self.unsigned_width(value, width)?;
        let bytes = value.to_be_bytes();
        self.write(&bytes[8 - width..]);
        Ok(())
    }

    /// Write a signed little-endian integer.
    pub fn write_int_le(&mut self, value: i64, width: Option<usize>) -> Result<(), CursorError> {
        let width = self.signed_width(value, width)?;
        let bytes = value.to_le_bytes();
        self.write(&bytes[..width]);
        Ok(())
    }

    /// Write a signed big-endian integer.
    pub fn write_int_be(&mut self, value: i64, width: Option<usize>) -> Result<(), CursorError> {
        let width = self.signed_width(value, width)?;
        let bytes = value.to_be_bytes();
        self.write(&bytes[8 - width..]);
        Ok(())
    }

    /// Write bytes followed by a NUL terminator.
    pub fn write_bytes_nul(&mut self, bytes: &[u8]) {
        self.write(bytes);
        self.write_u8(0);
    }

    /// Write a string followed by a NUL terminator.
    pub fn write_string_nul(&mut self, s: &str) {
        self.write_bytes_nul(s.as_bytes());
    }

    /// Write bytes preceded by a caller-encoded length prefix.
    ///
    /// `prefix` receives this cursor and the byte length and performs the
    /// prefix write itself, so any prefix encoding can be plugged in.
    pub fn write_bytes_prefix<F>(&mut self, bytes: &[u8], prefix: F) -> Result<(), CursorError>
    where
        F: FnOnce(&mut Self, usize) -> Result<(), CursorError>,
    {
        prefix(self, bytes.len())?;
        self.write(bytes);
        Ok(())
    }

    /// Write a string preceded by a caller-encoded length prefix.
    pub fn write_string_prefix<F>(&mut self, s: &str, prefix: F) -> Result<(), CursorError>
    where
        F: FnOnce(&mut Self, usize) -> Result<(), CursorError>,
    {
        self.write_bytes_prefix(s.as_bytes(), prefix)
    }

    fn unsigned_width(&self, value: u64, width: Option<usize>) -> Result<usize, CursorError> {
        let Some(width) = width else {
            return Ok(self.width_policy.unsigned_width(value));
        };
        check_width(width)?;
        if !fits_unsigned(value, width) && self.strictness == Strictness::Strict {
            return Err(CursorError::ValueOutOfRange { width });
        }
        Ok(width)
    }

    fn signed_width(&self, value: i64, width: Option<usize>) -> Result<usize, CursorError> {
        let Some(width) = width else {
            return Ok(self.width_policy.signed_width(value));
        };
        check_width(width)?;
        if !fits_signed(value, width) && self.strictness == Strictness::Strict {
            return Err(CursorError::ValueOutOfRange { width });
        }
        Ok(width)
    }
}

impl From<Vec<u8>> for ByteCursor {
    fn from(buf: Vec<u8>) -> Self {
        Self::from_vec(buf)
    }
}

impl From<&[u8]> for ByteCursor {
    fn from(buf: &[u8]) -> Self {
        Self::from_vec(buf.to_vec())
    }
}

fn sign_extend(raw: u64, width: usize) -> i64 {
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_roundtrip_all_widths() {
        for width in 1..=8usize {
            let max = if width == 8 {
                u64::MAX
            } else {
                (1u64 << (8 * width)) - 1
            };
            for value in [0, 1, max / 3, max] {
                let mut cursor = ByteCursor::new();
                cursor.write_uint_le(value, Some(width)).unwrap();
                cursor.write_uint_be(value, Some(width)).unwrap();
                assert_eq!(cursor.len(), 2 * width);
                cursor.seek(0);
                assert_eq!(cursor.read_uint_le(width).unwrap(), value);
                assert_eq!(cursor.read_uint_be(width).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_int_roundtrip_all_widths() {
        for width in 1..=8usize {
            let bits = 8 * width as u32;
            let (min, max) = if width == 8 {
                (i64::MIN, i64::MAX)
            } else {
                (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
            };
            for value in [min, -1, 0, 1, max] {
                let mut cursor = ByteCursor::new();
                cursor.write_int_le(value, Some(width)).unwrap();
                cursor.write_int_be(value, Some(width)).unwrap();
                cursor.seek(0);
                assert_eq!(cursor.read_int_le(width).unwrap(), value, "le width {width}");
                assert_eq!(cursor.read_int_be(width).unwrap(), value, "be width {width}");
            }
        }
    }

    #[test]
    fn test_values_beyond_53_bits() {
        let value = 0x00FF_EEDD_CCBB_AA99_u64 | (1 << 60);
        let mut cursor = ByteCursor::new();
        cursor.write_uint_le(value, Some(8)).unwrap();
        cursor.seek(0);
        assert_eq!(cursor.read_uint_le(8).unwrap(), value);

        let mut cursor = ByteCursor::from_vec(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(cursor.read_uint_be(7).unwrap(), 0x0001_0203_0405_0607);
    }

    #[test]
    fn test_byte_order() {
        let mut cursor = ByteCursor::new();
        cursor.write_uint_le(0x1234, Some(2)).unwrap();
        cursor.write_uint_be(0x1234, Some(2)).unwrap();
        assert_eq!(cursor.as_slice(), &[0x34, 0x12, 0x12, 0x34]);
    }

    #[test]
    fn test_default_width_policies() {
        assert_eq!(WidthPolicy::Increment.unsigned_width(0), 1);
        assert_eq!(WidthPolicy::Increment.unsigned_width(0x1_0000), 3);
        assert_eq!(WidthPolicy::Doubling.unsigned_width(0x1_0000), 4);
        assert_eq!(WidthPolicy::Doubling.unsigned_width(0x1_0000_0000), 8);
        assert_eq!(WidthPolicy::Increment.signed_width(127), 1);
        assert_eq!(WidthPolicy::Increment.signed_width(128), 2);
        assert_eq!(WidthPolicy::Increment.signed_width(-128), 1);
        assert_eq!(WidthPolicy::Increment.signed_width(-129), 2);
        assert_eq!(WidthPolicy::Doubling.signed_width(-40_000), 4);

        let mut cursor = ByteCursor::new().width_policy(WidthPolicy::Doubling);
        cursor.write_uint_le(0x01_0000, None).unwrap();
        assert_eq!(cursor.as_slice(), &[0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_invalid_width() {
        let mut cursor = ByteCursor::from_vec(vec![0; 16]);
        assert_eq!(cursor.read_uint_le(0), Err(CursorError::InvalidWidth(0)));
        assert_eq!(cursor.read_int_be(9), Err(CursorError::InvalidWidth(9)));
        assert_eq!(
            cursor.write_uint_le(1, Some(9)),
            Err(CursorError::InvalidWidth(9))
        );
    }

    #[test]
    fn test_permissive_short_reads() {
        let mut cursor = ByteCursor::from_vec(vec![0x01, 0x02, 0x03]);
        assert_eq!(cursor.read(2).unwrap(), &[0x01, 0x02]);
        assert_eq!(cursor.read(10).unwrap(), &[0x03]);
        assert_eq!(cursor.position(), 3);
        assert!(cursor.read(4).unwrap().is_empty());

        // Missing integer bytes read as zero
        let mut cursor = ByteCursor::from_vec(vec![0x34, 0x12]);
        assert_eq!(cursor.read_uint_le(4).unwrap(), 0x1234);
    }

    #[test]
    fn test_strict_short_reads() {
        let mut cursor = ByteCursor::from_vec(vec![0x01, 0x02, 0x03]).strictness(Strictness::Strict);
        assert_eq!(cursor.read(2).unwrap(), &[0x01, 0x02]);
        assert_eq!(
            cursor.read_uint_le(4),
            Err(CursorError::OutOfBounds {
                position: 2,
                requested: 4,
                available: 1,
            })
        );
        // A failed read leaves the position untouched
        assert_eq!(cursor.position(), 2);

        let mut cursor = ByteCursor::new().strictness(Strictness::Strict);
        assert_eq!(
            cursor.write_uint_le(256, Some(1)),
            Err(CursorError::ValueOutOfRange { width: 1 })
        );
    }

    #[test]
    fn test_read_rest() {
        let mut cursor = ByteCursor::with_position(vec![1, 2, 3, 4], 1);
        assert_eq!(cursor.read_rest(), &[2, 3, 4]);
        assert!(cursor.is_exhausted());
        assert!(cursor.read_rest().is_empty());
    }

    #[test]
    fn test_nul_strings() {
        let mut cursor = ByteCursor::new();
        cursor.write_string_nul("hello");
        cursor.write_string_nul("world");
        assert_eq!(cursor.as_slice(), b"hello\0world\0");

        cursor.seek(0);
        assert_eq!(cursor.read_string(None).unwrap(), "hello");
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.read_string(None).unwrap(), "world");
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_unterminated_string() {
        let mut cursor = ByteCursor::from_vec(b"abc".to_vec());
        assert_eq!(cursor.read_string(None).unwrap(), "abc");

        let mut cursor = ByteCursor::from_vec(b"abc".to_vec()).strictness(Strictness::Strict);
        assert_eq!(
            cursor.read_string(None),
            Err(CursorError::MissingTerminator { position: 0 })
        );
    }

    #[test]
    fn test_fixed_length_string() {
        let mut cursor = ByteCursor::from_vec(b"abc\0def".to_vec());
        assert_eq!(cursor.read_string(Some(5)).unwrap(), "abc\0d");
    }

    #[test]
    fn test_string_prefix_callback() {
        let mut cursor = ByteCursor::new();
        cursor
            .write_string_prefix("hello", |c, len| c.write_uint_le(len as u64, Some(2)))
            .unwrap();
        assert_eq!(cursor.as_slice(), &[5, 0, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_overwrite_and_append() {
        let mut cursor = ByteCursor::from_vec(vec![0xAA; 4]);
        cursor.write_at(1, &[0x01, 0x02]);
        assert_eq!(cursor.as_slice(), &[0xAA, 0x01, 0x02, 0xAA]);
        assert_eq!(cursor.position(), 3);

        cursor.write(&[0x03, 0x04]);
        assert_eq!(cursor.as_slice(), &[0xAA, 0x01, 0x02, 0x03, 0x04]);

        cursor.seek(0);
        cursor.append(&[0x05]);
        assert_eq!(cursor.as_slice(), &[0xAA, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut cursor = ByteCursor::new();
        cursor.seek(3);
        cursor.write_u8(7);
        assert_eq!(cursor.as_slice(), &[0, 0, 0, 7]);

        cursor.seek(1);
        cursor.write_zeros(5);
        assert_eq!(cursor.as_slice(), &[0, 0, 0, 0, 0, 0]);
    }
}
