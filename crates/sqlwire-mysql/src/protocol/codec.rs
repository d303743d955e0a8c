//! Length-encoded integers and strings on top of `ByteCursor`.
//!
//! MySQL uses a variable-length integer encoding:
//! - 0x00-0xFA: 1-byte value
//! - 0xFC: 2-byte value follows
//! - 0xFD: 3-byte value follows
//! - 0xFE: 8-byte value follows
//! - 0xFB: NULL (only meaningful inside result rows)

#![allow(clippy::cast_possible_truncation)]

use sqlwire_core::{ByteCursor, Error, Result};

/// Marker byte for a NULL length-encoded value.
pub const LENENC_NULL: u8 = 0xFB;

/// MySQL wire helpers. Implemented for [`ByteCursor`].
pub trait WireCodec {
    /// Read a length-encoded integer. `Ok(None)` is the 0xFB NULL marker.
    fn read_lenenc_int(&mut self) -> Result<Option<u64>>;

    /// Write a length-encoded integer using the smallest form.
    fn write_lenenc_int(&mut self, value: u64);

    /// Read length-encoded bytes. `Ok(None)` is the NULL marker.
    fn read_lenenc_bytes(&mut self) -> Result<Option<Vec<u8>>>;

    /// Read a length-encoded UTF-8 string (lossy). `Ok(None)` is the NULL marker.
    fn read_lenenc_string(&mut self) -> Result<Option<String>>;

    /// Write bytes with a length-encoded prefix.
    fn write_lenenc_bytes(&mut self, bytes: &[u8]);

    /// Write a string with a length-encoded prefix.
    fn write_string_lenenc(&mut self, s: &str);

    /// Read a 2-byte little-endian integer.
    fn read_u16_le(&mut self) -> Result<u16>;

    /// Read a 4-byte little-endian integer.
    fn read_u32_le(&mut self) -> Result<u32>;
}

/// Number of bytes `write_lenenc_int` emits for `value`.
pub fn lenenc_int_len(value: u64) -> usize {
    match value {
        0..=250 => 1,
        251..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 9,
    }
}

impl WireCodec for ByteCursor {
    fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let position = self.position();
        let first = self.read_uint_le(1)? as u8;
        let width = match first {
            0x00..=0xFA => return Ok(Some(u64::from(first))),
            LENENC_NULL => return Ok(None),
            0xFC => 2,
            0xFD => 3,
            0xFE => 8,
            0xFF => {
                return Err(Error::protocol(format!(
                    "invalid length-encoded integer prefix 0xFF at offset {}",
                    position
                )));
            }
        };
        Ok(Some(self.read_uint_le(width)?))
    }

    fn write_lenenc_int(&mut self, value: u64) {
        let (prefix, width) = match lenenc_int_len(value) {
            1 => {
                self.write_u8(value as u8);
                return;
            }
            3 => (0xFC, 2),
            4 => (0xFD, 3),
            _ => (0xFE, 8),
        };
        self.write_u8(prefix);
        self.write(&value.to_le_bytes()[..width]);
    }

    fn read_lenenc_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_lenenc_int()? else {
            return Ok(None);
        };
        let len = usize::try_from(len)
            .map_err(|_| Error::protocol(format!("length {} does not fit in memory", len)))?;
        Ok(Some(self.read(len)?.to_vec()))
    }

    fn read_lenenc_string(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_lenenc_bytes()?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn write_lenenc_bytes(&mut self, bytes: &[u8]) {
        self.write_lenenc_int(bytes.len() as u64);
        self.write(bytes);
    }

    fn write_string_lenenc(&mut self, s: &str) {
        // The prefix callback cannot fail: lenenc covers every usize length.
        let _ = self.write_string_prefix(s, |cursor, len| {
            cursor.write_lenenc_int(len as u64);
            Ok(())
        });
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        Ok(self.read_uint_le(2)? as u16)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(self.read_uint_le(4)? as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlwire_core::Strictness;

    #[test]
    fn test_lenenc_int_minimal_forms() {
        let cases: [(u64, usize, u8); 7] = [
            (0, 1, 0x00),
            (250, 1, 0xFA),
            (251, 3, 0xFC),
            (65_535, 3, 0xFC),
            (65_536, 4, 0xFD),
            (16_777_215, 4, 0xFD),
            (16_777_216, 9, 0xFE),
        ];
        for (value, len, first) in cases {
            let mut cursor = ByteCursor::new();
            cursor.write_lenenc_int(value);
            assert_eq!(cursor.len(), len, "encoded length of {value}");
            assert_eq!(cursor.as_slice()[0], first, "prefix of {value}");
            assert_eq!(lenenc_int_len(value), len);

            cursor.seek(0);
            assert_eq!(cursor.read_lenenc_int().unwrap(), Some(value));
            assert!(cursor.is_exhausted());
        }
    }

    #[test]
    fn test_lenenc_int_decoding() {
        let mut cursor = ByteCursor::from_vec(vec![0xFC, 0x34, 0x12]);
        assert_eq!(cursor.read_lenenc_int().unwrap(), Some(0x1234));

        let mut cursor = ByteCursor::from_vec(vec![0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(cursor.read_lenenc_int().unwrap(), Some(0x0012_3456));

        let mut cursor =
            ByteCursor::from_vec(vec![0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(
            cursor.read_lenenc_int().unwrap(),
            Some(0x0807_0605_0403_0201)
        );
    }

    #[test]
    fn test_null_marker_and_invalid_prefix() {
        let mut cursor = ByteCursor::from_vec(vec![0xFB]);
        assert_eq!(cursor.read_lenenc_int().unwrap(), None);

        let mut cursor = ByteCursor::from_vec(vec![0xFB]);
        assert_eq!(cursor.read_lenenc_bytes().unwrap(), None);

        let mut cursor = ByteCursor::from_vec(vec![0xFF]);
        assert!(matches!(
            cursor.read_lenenc_int(),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_lenenc_strings() {
        let mut cursor = ByteCursor::new();
        cursor.write_string_lenenc("hello");
        cursor.write_lenenc_bytes(&[0xDE, 0xAD]);
        assert_eq!(cursor.as_slice()[0], 5);

        cursor.seek(0);
        assert_eq!(cursor.read_lenenc_string().unwrap().as_deref(), Some("hello"));
        assert_eq!(cursor.read_lenenc_bytes().unwrap(), Some(vec![0xDE, 0xAD]));
    }

    #[test]
    fn test_long_string_uses_wide_prefix() {
        let text = "x".repeat(300);
        let mut cursor = ByteCursor::new();
        cursor.write_string_lenenc(&text);
        assert_eq!(&cursor.as_slice()[..3], &[0xFC, 0x2C, 0x01]);
        assert_eq!(cursor.len(), 303);
    }

    #[test]
    fn test_truncated_value_in_strict_mode() {
        let mut cursor = ByteCursor::from_vec(vec![0x05, b'a', b'b']).strictness(Strictness::Strict);
        assert!(matches!(
            cursor.read_lenenc_string(),
            Err(Error::Protocol(_))
        ));
    }
}
