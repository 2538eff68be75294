//! Append-only byte sink emitting POF wire primitives.

use crate::error::PofResult;
use bytes::{BufMut, BytesMut};

/// A buffer-based byte sink for POF encoding.
///
/// Multi-byte floating point values are written in big-endian order;
/// integers are written as packed (zig-zag LEB128) values.
#[derive(Debug)]
pub struct WriteBuffer {
    buffer: BytesMut,
}

impl WriteBuffer {
    /// Creates a new `WriteBuffer` with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Creates a new `WriteBuffer` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the written bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the buffer and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single raw byte.
    pub fn write_u8(&mut self, v: u8) -> PofResult<()> {
        self.buffer.put_u8(v);
        Ok(())
    }

    /// Writes a single signed byte.
    pub fn write_i8(&mut self, v: i8) -> PofResult<()> {
        self.buffer.put_i8(v);
        Ok(())
    }

    /// Writes a boolean as a single byte (0 for false, 1 for true).
    pub fn write_bool(&mut self, v: bool) -> PofResult<()> {
        self.buffer.put_u8(if v { 1 } else { 0 });
        Ok(())
    }

    /// Writes a 32-bit floating point in big-endian order.
    pub fn write_f32(&mut self, v: f32) -> PofResult<()> {
        self.buffer.put_f32(v);
        Ok(())
    }

    /// Writes a 64-bit floating point in big-endian order.
    pub fn write_f64(&mut self, v: f64) -> PofResult<()> {
        self.buffer.put_f64(v);
        Ok(())
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_bytes(&mut self, v: &[u8]) -> PofResult<()> {
        self.buffer.put_slice(v);
        Ok(())
    }

    /// Writes a packed 32-bit integer (zig-zag, LEB128 continuation).
    pub fn write_packed_i32(&mut self, v: i32) -> PofResult<()> {
        let zigzag = ((v << 1) ^ (v >> 31)) as u32;
        self.write_varuint(zigzag as u128)
    }

    /// Writes a packed 64-bit integer.
    pub fn write_packed_i64(&mut self, v: i64) -> PofResult<()> {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.write_varuint(zigzag as u128)
    }

    /// Writes a packed 128-bit integer.
    pub fn write_packed_i128(&mut self, v: i128) -> PofResult<()> {
        let zigzag = ((v << 1) ^ (v >> 127)) as u128;
        self.write_varuint(zigzag)
    }

    fn write_varuint(&mut self, mut v: u128) -> PofResult<()> {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buffer.put_u8(byte);
                return Ok(());
            }
            self.buffer.put_u8(byte | 0x80);
        }
    }

    /// Writes a string as a packed byte length followed by UTF-8 bytes.
    pub fn write_string(&mut self, v: &str) -> PofResult<()> {
        let bytes = v.as_bytes();
        self.write_packed_i32(bytes.len() as i32)?;
        self.write_bytes(bytes)
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
