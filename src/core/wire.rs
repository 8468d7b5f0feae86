//! # Wire Primitives
//!
//! Bounds-checked little-endian readers and writers shared by every message
//! layout, plus the NUL-padded fixed-width string convention.
//!
//! Fixed-width strings occupy exactly `width` bytes on the wire. Encoding
//! rejects input longer than the width; decoding stops at the first NUL or at
//! the full width, whichever comes first.

use bytes::{BufMut, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Cursor over a received payload. Every read checks the remaining length and
/// reports a [`ProtocolError::DecodeError`] tagged with the structure being read.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::decode(
                self.context,
                format!(
                    "{} (needed {n} bytes at offset {}, {} left)",
                    constants::ERR_SHORT_PAYLOAD,
                    self.pos,
                    self.remaining()
                ),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads a NUL-padded string of exactly `width` bytes.
    pub fn fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        Ok(decode_fixed_str(raw))
    }

    /// Reads a `u32` length followed by that many bytes, bounded by `max`.
    pub fn sized_bytes(&mut self, max: usize) -> Result<&'a [u8]> {
        let size = self.u32()? as usize;
        if size > max {
            return Err(ProtocolError::decode(
                self.context,
                format!("declared size {size} exceeds maximum {max}"),
            ));
        }
        self.take(size)
    }

    /// Reads a length-prefixed, NUL-terminated string.
    pub fn sized_str(&mut self, max: usize) -> Result<String> {
        let raw = self.sized_bytes(max)?;
        Ok(decode_fixed_str(raw))
    }

    /// Fails when bytes are left over after a fixed-layout structure.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(ProtocolError::decode(
                self.context,
                format!("{} ({} bytes)", constants::ERR_TRAILING_BYTES, self.remaining()),
            ));
        }
        Ok(())
    }
}

/// Truncates a raw buffer at the first NUL and interprets it as text.
pub fn decode_fixed_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Longest prefix of `value` that is at most `max` bytes and ends on a char boundary.
///
/// Lossy decoding turns each invalid byte into a 3-byte replacement char, so
/// decoded text can exceed the field it came from.
pub fn truncate_to_width(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Append-only payload builder.
#[derive(Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.put_i8(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(u8::from(v));
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.put_i16_le(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.put_f64_le(v);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Writes `value` NUL-padded to exactly `width` bytes.
    pub fn fixed_str(&mut self, value: &str, width: usize) -> Result<&mut Self> {
        let raw = value.as_bytes();
        if raw.len() > width {
            return Err(ProtocolError::StringTooLong {
                len: raw.len(),
                max: width,
            });
        }
        self.buf.put_slice(raw);
        self.buf.put_bytes(0, width - raw.len());
        Ok(self)
    }

    /// Writes a `u32` length prefix followed by the bytes.
    pub fn sized_bytes(&mut self, value: &[u8], max: usize) -> Result<&mut Self> {
        if value.len() > max {
            return Err(ProtocolError::StringTooLong {
                len: value.len(),
                max,
            });
        }
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Writes a length-prefixed string including its terminating NUL.
    pub fn sized_str(&mut self, value: &str, max: usize) -> Result<&mut Self> {
        if value.is_empty() {
            self.buf.put_u32_le(0);
            return Ok(self);
        }
        if value.len() + 1 > max {
            return Err(ProtocolError::StringTooLong {
                len: value.len() + 1,
                max,
            });
        }
        self.buf.put_u32_le((value.len() + 1) as u32);
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        Ok(self)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn freeze(self) -> bytes::Bytes {
        self.buf.freeze()
    }
}
