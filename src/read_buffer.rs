//! Sequential byte source consuming POF wire primitives.

use crate::error::{PofError, PofResult};

/// A cursor over an in-memory byte slice for POF decoding.
///
/// Every read checks the remaining length first; running off the end of the
/// stream surfaces as [`PofError::Transport`].
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    /// Creates a new `ReadBuffer` over the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the number of bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns the current position in the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the raw bytes between two positions visited earlier.
    ///
    /// Used to capture an opaque remainder verbatim for re-emission.
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.data[start..end]
    }

    fn ensure_remaining(&self, n: usize) -> PofResult<()> {
        if self.remaining() < n {
            Err(PofError::Transport(format!(
                "insufficient data: need {} bytes, have {}",
                n,
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    /// Reads a single raw byte.
    pub fn read_u8(&mut self) -> PofResult<u8> {
        self.ensure_remaining(1)?;
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads a single signed byte.
    pub fn read_i8(&mut self) -> PofResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a boolean from a single byte.
    pub fn read_bool(&mut self) -> PofResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a 32-bit floating point in big-endian order.
    pub fn read_f32(&mut self) -> PofResult<f32> {
        self.ensure_remaining(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(f32::from_be_bytes(raw))
    }

    /// Reads a 64-bit floating point in big-endian order.
    pub fn read_f64(&mut self) -> PofResult<f64> {
        self.ensure_remaining(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(f64::from_be_bytes(raw))
    }

    /// Reads the specified number of raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> PofResult<Vec<u8>> {
        self.ensure_remaining(len)?;
        let out = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn read_varuint(&mut self, max_bits: u32) -> PofResult<u128> {
        let mut value: u128 = 0;
        let mut shift: u32 = 0;
        loop {
            let b = self.read_u8()?;
            if shift >= max_bits {
                return Err(PofError::Format(
                    "packed integer exceeds maximum width".to_string(),
                ));
            }
            value |= ((b & 0x7F) as u128) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a packed 32-bit integer (zig-zag, LEB128 continuation).
    pub fn read_packed_i32(&mut self) -> PofResult<i32> {
        let zigzag = self.read_varuint(32)? as u32;
        Ok(((zigzag >> 1) as i32) ^ -((zigzag & 1) as i32))
    }

    /// Reads a packed 64-bit integer.
    pub fn read_packed_i64(&mut self) -> PofResult<i64> {
        let zigzag = self.read_varuint(64)? as u64;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    /// Reads a packed 128-bit integer.
    pub fn read_packed_i128(&mut self) -> PofResult<i128> {
        let zigzag = self.read_varuint(128)?;
        Ok(((zigzag >> 1) as i128) ^ -((zigzag & 1) as i128))
    }

    /// Reads a packed length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> PofResult<String> {
        let len = self.read_packed_i32()?;
        if len < 0 {
            return Err(PofError::Format(format!("invalid string length: {}", len)));
        }
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| PofError::Format(format!("invalid UTF-8 string: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_buffer::WriteBuffer;

    fn round_trip_i32(v: i32) {
        let mut buf = WriteBuffer::new();
        buf.write_packed_i32(v).unwrap();
        let bytes = buf.into_bytes();
        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(input.read_packed_i32().unwrap(), v);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_packed_i32_round_trip() {
        for v in [0, 1, -1, 63, 64, -64, -65, 300, i32::MAX, i32::MIN] {
            round_trip_i32(v);
        }
    }

    #[test]
    fn test_packed_i64_round_trip() {
        for v in [0i64, -1, 1 << 40, -(1 << 40), i64::MAX, i64::MIN] {
            let mut buf = WriteBuffer::new();
            buf.write_packed_i64(v).unwrap();
            let bytes = buf.into_bytes();
            let mut input = ReadBuffer::new(&bytes);
            assert_eq!(input.read_packed_i64().unwrap(), v);
        }
    }

    #[test]
    fn test_packed_i128_round_trip() {
        for v in [0i128, -1, i128::from(u64::MAX) + 1, i128::MAX, i128::MIN] {
            let mut buf = WriteBuffer::new();
            buf.write_packed_i128(v).unwrap();
            let bytes = buf.into_bytes();
            let mut input = ReadBuffer::new(&bytes);
            assert_eq!(input.read_packed_i128().unwrap(), v);
        }
    }

    #[test]
    fn test_read_f32() {
        let data = [0x3F, 0x80, 0x00, 0x00];
        let mut input = ReadBuffer::new(&data);
        assert_eq!(input.read_f32().unwrap(), 1.0f32);
    }

    #[test]
    fn test_read_f64() {
        let data = [0x3F, 0xF0, 0, 0, 0, 0, 0, 0];
        let mut input = ReadBuffer::new(&data);
        assert_eq!(input.read_f64().unwrap(), 1.0f64);
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = WriteBuffer::new();
        buf.write_string("héllo").unwrap();
        let bytes = buf.into_bytes();
        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(input.read_string().unwrap(), "héllo");
    }

    #[test]
    fn test_insufficient_data_is_transport_error() {
        let data = [0x80]; // continuation bit set, nothing follows
        let mut input = ReadBuffer::new(&data);
        let err = input.read_packed_i32().unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_oversized_varint_is_format_error() {
        // six continuation bytes exceed the 32-bit width
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut input = ReadBuffer::new(&data);
        assert!(matches!(
            input.read_packed_i32().unwrap_err(),
            PofError::Format(_)
        ));
    }

    #[test]
    fn test_invalid_utf8_is_format_error() {
        let data = [0x04, 0xFF, 0xFE]; // length 2, invalid bytes
        let mut input = ReadBuffer::new(&data);
        assert!(matches!(
            input.read_string().unwrap_err(),
            PofError::Format(_)
        ));
    }

    #[test]
    fn test_position_and_slice() {
        let data = [1, 2, 3, 4, 5];
        let mut input = ReadBuffer::new(&data);
        input.read_u8().unwrap();
        let start = input.position();
        input.read_bytes(3).unwrap();
        let end = input.position();
        assert_eq!(input.slice(start, end), &[2, 3, 4]);
        assert_eq!(input.remaining(), 1);
    }
}
