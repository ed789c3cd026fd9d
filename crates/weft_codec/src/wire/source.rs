use alloc::string::String;
use alloc::vec::Vec;
use std::io::{self, Read};

use super::{Marker, TypeTag, unzigzag};
use crate::error::DecodeError;

// -----------------------------------------------------------------------------
// Source

/// Primitive reader over a byte source, the mirror of [`Sink`](super::Sink).
pub struct Source<'a> {
    input: &'a mut dyn Read,
    max_payload: usize,
}

impl<'a> Source<'a> {
    pub(crate) fn new(input: &'a mut dyn Read, max_payload: usize) -> Self {
        Self { input, max_payload }
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let mut buf = [0_u8; 1];
        self.input.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    #[inline]
    pub(crate) fn read_marker(&mut self) -> Result<Marker, DecodeError> {
        Marker::from_byte(self.read_u8()?)
    }

    #[inline]
    pub(crate) fn read_tag(&mut self) -> Result<TypeTag, DecodeError> {
        TypeTag::from_byte(self.read_u8()?)
    }

    #[inline]
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        self.input.read_exact(buf)?;
        Ok(())
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0_u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_u8()?;
            let bits = (byte & 0x7F) as u64;
            if shift == 63 && bits > 1 {
                return Err(DecodeError::VarIntOverflow);
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarIntOverflow)
    }

    #[inline]
    pub fn read_u32_varint(&mut self) -> Result<u32, DecodeError> {
        u32::try_from(self.read_varint()?).map_err(|_| DecodeError::VarIntOverflow)
    }

    #[inline]
    pub fn read_signed(&mut self) -> Result<i64, DecodeError> {
        Ok(unzigzag(self.read_varint()?))
    }

    #[inline]
    pub fn read_smallint(&mut self) -> Result<i32, DecodeError> {
        i32::try_from(self.read_signed()?).map_err(|_| DecodeError::VarIntOverflow)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let mut buf = [0_u8; 4];
        self.read_raw(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let mut buf = [0_u8; 8];
        self.read_raw(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_u32_fixed(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0_u8; 4];
        self.read_raw(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a length-prefixed byte block.
    ///
    /// The announced length is checked against the ceiling before anything is
    /// allocated, so a corrupt prefix cannot trigger a huge allocation.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_varint()?;
        if len > self.max_payload as u64 {
            return Err(DecodeError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }
        let mut buf = alloc::vec![0_u8; len as usize];
        self.read_raw(&mut buf)?;
        Ok(buf)
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        String::from_utf8(self.read_bytes()?).map_err(|_| DecodeError::InvalidUtf8)
    }
}

// -----------------------------------------------------------------------------
// RewindableSource

/// A reader that records what it reads so the stream can be decoded again.
///
/// Decoding may fail late, for example on a written type that needs a migration
/// hook. Wrapping a non-seekable input in a `RewindableSource` lets the caller
/// adjust the codec, call [`rewind`](Self::rewind) and start a new session from
/// the first byte.
///
/// ```
/// use std::io::Read;
/// use weft_codec::wire::RewindableSource;
///
/// let mut source = RewindableSource::new(&b"abc"[..]);
/// let mut buf = [0; 2];
/// source.read_exact(&mut buf).unwrap();
/// source.rewind();
/// let mut all = Vec::new();
/// source.read_to_end(&mut all).unwrap();
/// assert_eq!(all, b"abc");
/// ```
#[derive(Debug)]
pub struct RewindableSource<R> {
    inner: R,
    recorded: Vec<u8>,
    position: usize,
    recording: bool,
}

impl<R: Read> RewindableSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
            position: 0,
            recording: true,
        }
    }

    /// Restarts reading from the first byte.
    ///
    /// # Panics
    ///
    /// Panics if [`commit`](Self::commit) was called.
    pub fn rewind(&mut self) {
        assert!(self.recording, "cannot rewind a committed source");
        self.position = 0;
    }

    /// Drops the recorded bytes and stops recording; rewinding is no longer possible.
    pub fn commit(&mut self) {
        self.recorded.drain(..self.position);
        self.position = 0;
        self.recording = false;
    }

    /// Number of bytes kept for replay.
    #[inline]
    pub fn recorded_len(&self) -> usize {
        self.recorded.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for RewindableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position < self.recorded.len() {
            let available = &self.recorded[self.position..];
            let len = available.len().min(buf.len());
            buf[..len].copy_from_slice(&available[..len]);
            self.position += len;
            if !self.recording && self.position == self.recorded.len() {
                self.recorded.clear();
                self.position = 0;
            }
            return Ok(len);
        }
        let len = self.inner.read(buf)?;
        if self.recording {
            self.recorded.extend_from_slice(&buf[..len]);
            self.position += len;
        }
        Ok(len)
    }
}

// -----------------------------------------------------------------------------
// Tests
