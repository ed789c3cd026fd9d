use std::io::Write;

use super::{Marker, TypeTag, zigzag};
use crate::error::EncodeError;

// -----------------------------------------------------------------------------
// Sink

/// Primitive writer over a byte sink.
///
/// Integers are LEB128 varints (signed ones zig-zag mapped first), floats are
/// little-endian, strings and byte blocks are length-prefixed.
pub struct Sink<'a> {
    out: &'a mut dyn Write,
    max_payload: usize,
}

impl<'a> Sink<'a> {
    pub(crate) fn new(out: &'a mut dyn Write, max_payload: usize) -> Self {
        Self { out, max_payload }
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.out.write_all(&[value])?;
        Ok(())
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.write_u8(value as u8)
    }

    #[inline]
    pub(crate) fn write_marker(&mut self, marker: Marker) -> Result<(), EncodeError> {
        self.write_u8(marker.to_byte())
    }

    #[inline]
    pub(crate) fn write_tag(&mut self, tag: TypeTag) -> Result<(), EncodeError> {
        self.write_u8(tag.to_byte())
    }

    /// Writes raw bytes with no length prefix.
    #[inline]
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    pub fn write_varint(&mut self, mut value: u64) -> Result<(), EncodeError> {
        let mut buf = [0_u8; 10];
        let mut len = 0;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                buf[len] = byte;
                len += 1;
                break;
            }
            buf[len] = byte | 0x80;
            len += 1;
        }
        self.write_raw(&buf[..len])
    }

    #[inline]
    pub fn write_signed(&mut self, value: i64) -> Result<(), EncodeError> {
        self.write_varint(zigzag(value))
    }

    /// Small signed integers such as versions, `-1` included.
    #[inline]
    pub fn write_smallint(&mut self, value: i32) -> Result<(), EncodeError> {
        self.write_signed(value as i64)
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) -> Result<(), EncodeError> {
        self.write_raw(&value.to_le_bytes())
    }

    #[inline]
    pub fn write_f64(&mut self, value: f64) -> Result<(), EncodeError> {
        self.write_raw(&value.to_le_bytes())
    }

    #[inline]
    pub fn write_u32_fixed(&mut self, value: u32) -> Result<(), EncodeError> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Writes a length-prefixed byte block, refusing blocks above the ceiling.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if bytes.len() > self.max_payload {
            return Err(EncodeError::Capacity {
                len: bytes.len(),
                max: self.max_payload,
            });
        }
        self.write_varint(bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    #[inline]
    pub fn write_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.write_bytes(value.as_bytes())
    }

    pub(crate) fn flush(&mut self) -> Result<(), EncodeError> {
        self.out.flush()?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::Sink;
    use crate::error::EncodeError;

    #[test]
    fn varint_layout() {
        let mut out = Vec::new();
        let mut sink = Sink::new(&mut out, 16);
        sink.write_varint(0).unwrap();
        sink.write_varint(127).unwrap();
        sink.write_varint(300).unwrap();
        sink.write_signed(-1).unwrap();
        assert_eq!(out, [0x00, 0x7F, 0xAC, 0x02, 0x01]);
    }

    #[test]
    fn ceiling() {
        let mut out = Vec::new();
        let mut sink = Sink::new(&mut out, 4);
        sink.write_str("four").unwrap();
        let err = sink.write_str("fives").unwrap_err();
        assert!(matches!(err, EncodeError::Capacity { len: 5, max: 4 }));
        assert_eq!(out, b"\x04four");
    }
}
