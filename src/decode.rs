//! Low-level stream decoder: tags, headers, and structural skipping.
//!
//! Like the encoder, the decoder knows nothing about application types. It
//! reads wire structure only, which is what lets `skip_value` walk past any
//! value, user types included, without consulting a registry.

use crate::error::{PofError, PofResult};
use crate::read_buffer::ReadBuffer;
use crate::tags::TypeTag;

/// Maximum container nesting accepted from the stream. Hostile input past
/// this depth is rejected instead of overflowing the stack.
pub const MAX_DEPTH: usize = 512;

/// Stream decoder over a [`ReadBuffer`].
#[derive(Debug)]
pub struct PofDecoder<'a> {
    input: ReadBuffer<'a>,
}

impl<'a> PofDecoder<'a> {
    /// Creates a decoder over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            input: ReadBuffer::new(data),
        }
    }

    /// Returns the underlying cursor.
    pub fn input(&self) -> &ReadBuffer<'a> {
        &self.input
    }

    /// Returns the underlying cursor mutably.
    pub fn input_mut(&mut self) -> &mut ReadBuffer<'a> {
        &mut self.input
    }

    /// Reads a type tag (or user type id) as a packed integer.
    pub fn read_tag(&mut self) -> PofResult<i32> {
        self.input.read_packed_i32()
    }

    /// Reads an element or entry count, rejecting negative values.
    pub fn read_count(&mut self) -> PofResult<i32> {
        let count = self.input.read_packed_i32()?;
        if count < 0 {
            return Err(PofError::Format(format!("invalid count: {}", count)));
        }
        Ok(count)
    }

    /// Reads a property or sparse-array index (may be the `-1` sentinel).
    pub fn read_index(&mut self) -> PofResult<i32> {
        self.input.read_packed_i32()
    }

    /// Skips one complete tagged value, structurally.
    pub fn skip_value(&mut self) -> PofResult<()> {
        self.skip_value_at(MAX_DEPTH)
    }

    fn skip_value_at(&mut self, depth: usize) -> PofResult<()> {
        let tag = self.read_tag()?;
        self.skip_payload_at(tag, depth)
    }

    /// Skips the payload of a value whose tag has already been read (or is
    /// implied by a uniform container).
    pub fn skip_payload(&mut self, tag: i32) -> PofResult<()> {
        self.skip_payload_at(tag, MAX_DEPTH)
    }

    fn skip_zone(&mut self) -> PofResult<()> {
        match self.input.read_packed_i32()? {
            0 | 1 => Ok(()),
            2 => {
                self.input.read_packed_i32()?;
                self.input.read_packed_i32()?;
                Ok(())
            }
            z => Err(PofError::Format(format!("invalid zone kind: {}", z))),
        }
    }

    fn skip_packed(&mut self, n: usize) -> PofResult<()> {
        for _ in 0..n {
            self.input.read_packed_i128()?;
        }
        Ok(())
    }

    fn skip_payload_at(&mut self, tag: i32, depth: usize) -> PofResult<()> {
        if depth == 0 {
            return Err(PofError::Format("nesting too deep".to_string()));
        }
        if tag >= 0 {
            // user type body: version, then indexed properties to the
            // sentinel (the type id itself is the tag)
            self.input.read_packed_i32()?;
            loop {
                let index = self.read_index()?;
                if index == -1 {
                    return Ok(());
                }
                self.skip_value_at(depth - 1)?;
            }
        }
        match TypeTag::from_id(tag)? {
            TypeTag::Null => Ok(()),
            TypeTag::Boolean | TypeTag::Int8 => {
                self.input.read_u8()?;
                Ok(())
            }
            TypeTag::Int16 | TypeTag::Int32 | TypeTag::Int64 | TypeTag::Int128 => {
                self.skip_packed(1)
            }
            TypeTag::Float32 => {
                self.input.read_f32()?;
                Ok(())
            }
            TypeTag::Float64 => {
                self.input.read_f64()?;
                Ok(())
            }
            TypeTag::Decimal32 | TypeTag::Decimal64 | TypeTag::Decimal128 => self.skip_packed(2),
            TypeTag::OctetString | TypeTag::CharString => {
                let len = self.read_count()?;
                self.input.read_bytes(len as usize)?;
                Ok(())
            }
            TypeTag::Date => self.skip_packed(3),
            TypeTag::Time => {
                self.skip_packed(4)?;
                self.skip_zone()
            }
            TypeTag::DateTime => {
                self.skip_packed(7)?;
                self.skip_zone()
            }
            TypeTag::YearMonthInterval => self.skip_packed(2),
            TypeTag::TimeInterval => self.skip_packed(4),
            TypeTag::DayTimeInterval => self.skip_packed(5),
            TypeTag::Array | TypeTag::Collection => {
                let count = self.read_count()?;
                for _ in 0..count {
                    self.skip_value_at(depth - 1)?;
                }
                Ok(())
            }
            TypeTag::UniformArray | TypeTag::UniformCollection => {
                let count = self.read_count()?;
                let elem = self.read_tag()?;
                for _ in 0..count {
                    self.skip_payload_at(elem, depth - 1)?;
                }
                Ok(())
            }
            TypeTag::SparseArray => {
                self.read_count()?;
                loop {
                    let index = self.read_index()?;
                    if index == -1 {
                        return Ok(());
                    }
                    self.skip_value_at(depth - 1)?;
                }
            }
            TypeTag::UniformSparseArray => {
                self.read_count()?;
                let elem = self.read_tag()?;
                loop {
                    let index = self.read_index()?;
                    if index == -1 {
                        return Ok(());
                    }
                    self.skip_payload_at(elem, depth - 1)?;
                }
            }
            TypeTag::Map => {
                let count = self.read_count()?;
                for _ in 0..count {
                    self.skip_value_at(depth - 1)?;
                    self.skip_value_at(depth - 1)?;
                }
                Ok(())
            }
            TypeTag::UniformKeysMap => {
                let count = self.read_count()?;
                let key = self.read_tag()?;
                for _ in 0..count {
                    self.skip_payload_at(key, depth - 1)?;
                    self.skip_value_at(depth - 1)?;
                }
                Ok(())
            }
            TypeTag::UniformMap => {
                let count = self.read_count()?;
                let key = self.read_tag()?;
                let value = self.read_tag()?;
                for _ in 0..count {
                    self.skip_payload_at(key, depth - 1)?;
                    self.skip_payload_at(value, depth - 1)?;
                }
                Ok(())
            }
            TypeTag::Identity => {
                self.input.read_packed_i32()?;
                self.skip_value_at(depth - 1)
            }
            TypeTag::Reference => {
                self.input.read_packed_i32()?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::PofEncoder;
    use crate::write_buffer::WriteBuffer;

    fn encoded(build: impl FnOnce(&mut PofEncoder<'_>)) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        let mut enc = PofEncoder::new(&mut buf);
        build(&mut enc);
        buf.into_bytes()
    }

    fn assert_skips_all(bytes: &[u8]) {
        let mut dec = PofDecoder::new(bytes);
        dec.skip_value().unwrap();
        assert_eq!(dec.input().remaining(), 0);
    }

    #[test]
    fn test_skip_scalars() {
        assert_skips_all(&encoded(|e| e.write_null(-1).unwrap()));
        assert_skips_all(&encoded(|e| e.write_bool(-1, true).unwrap()));
        assert_skips_all(&encoded(|e| e.write_i8(-1, -5).unwrap()));
        assert_skips_all(&encoded(|e| e.write_i64(-1, i64::MIN).unwrap()));
        assert_skips_all(&encoded(|e| e.write_f64(-1, 2.5).unwrap()));
        assert_skips_all(&encoded(|e| e.write_string(-1, "skip me").unwrap()));
        assert_skips_all(&encoded(|e| e.write_octets(-1, &[1, 2, 3]).unwrap()));
    }

    #[test]
    fn test_skip_user_type() {
        let bytes = encoded(|e| {
            e.begin_user_type(-1, 100, 3).unwrap();
            e.write_i32(0, 7).unwrap();
            e.write_string(2, "nested").unwrap();
            e.end_complex().unwrap();
        });
        assert_skips_all(&bytes);
    }

    #[test]
    fn test_skip_nested_containers() {
        let bytes = encoded(|e| {
            e.begin_array(-1, 2).unwrap();
            e.begin_uniform_array(0, 2, TypeTag::Int32.id()).unwrap();
            e.write_i32(0, 1).unwrap();
            e.write_i32(1, 2).unwrap();
            e.end_complex().unwrap();
            e.begin_map(1, 1).unwrap();
            e.write_string(0, "k").unwrap();
            e.write_null(0).unwrap();
            e.end_complex().unwrap();
            e.end_complex().unwrap();
        });
        assert_skips_all(&bytes);
    }

    #[test]
    fn test_skip_sparse_array() {
        let bytes = encoded(|e| {
            e.begin_sparse_array(-1, 10).unwrap();
            e.write_i32(2, 20).unwrap();
            e.write_i32(9, 90).unwrap();
            e.end_complex().unwrap();
        });
        assert_skips_all(&bytes);
    }

    #[test]
    fn test_skip_identity_and_reference() {
        let bytes = encoded(|e| {
            e.begin_array(-1, 2).unwrap();
            e.register_identity(0).unwrap();
            e.begin_collection(0, 1).unwrap();
            e.write_bool(0, false).unwrap();
            e.end_complex().unwrap();
            e.write_reference(1, 0).unwrap();
            e.end_complex().unwrap();
        });
        assert_skips_all(&bytes);
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        // each nesting level is Array tag + count 1
        let mut buf = WriteBuffer::new();
        for _ in 0..(MAX_DEPTH + 8) {
            buf.write_packed_i32(TypeTag::Array.id()).unwrap();
            buf.write_packed_i32(1).unwrap();
        }
        let bytes = buf.into_bytes();
        let mut dec = PofDecoder::new(&bytes);
        assert!(matches!(
            dec.skip_value().unwrap_err(),
            PofError::Format(_)
        ));
    }

    #[test]
    fn test_negative_count_is_format_error() {
        let mut buf = WriteBuffer::new();
        buf.write_packed_i32(TypeTag::Array.id()).unwrap();
        buf.write_packed_i32(-2).unwrap();
        let bytes = buf.into_bytes();
        let mut dec = PofDecoder::new(&bytes);
        assert!(matches!(
            dec.skip_value().unwrap_err(),
            PofError::Format(_)
        ));
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let bytes = encoded(|e| e.write_string(-1, "truncate me").unwrap());
        let mut dec = PofDecoder::new(&bytes[..bytes.len() - 3]);
        assert!(dec.skip_value().unwrap_err().is_transport());
    }
}
