//! Bit-packed payload reader and writer.
//!
//! Values are written most-significant bit first and a finished buffer is padded
//! with zero bits up to the next byte boundary. Both ends must agree on the field
//! layout of every message; nothing in the stream describes itself.

use crate::error::{DecodeError, EncodeError};
use crate::protocol::WireEnum;

/// Number of bits needed to hold any value in `0..=max`. Never less than one.
pub const fn bits_for_value(max: u32) -> u8 {
    let bits = 32 - max.leading_zeros();
    if bits == 0 {
        1
    } else {
        bits as u8
    }
}

/// Number of bits needed to distinguish `count` different values.
pub const fn bits_for_count(count: u32) -> u8 {
    bits_for_value(count.saturating_sub(1))
}

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the low `bits` bits of `value`.
    pub fn write_bits(&mut self, value: u32, bits: u8) {
        debug_assert!(bits <= 32, "cannot write more than 32 bits at once");
        for shift in (0..bits).rev() {
            self.push_bit((value >> shift) & 1 == 1);
        }
    }

    fn push_bit(&mut self, set: bool) {
        let offset = self.bit_len % 8;
        if offset == 0 {
            self.buf.push(0);
        }
        if set {
            if let Some(last) = self.buf.last_mut() {
                *last |= 0x80 >> offset;
            }
        }
        self.bit_len += 1;
    }

    pub fn write_bool(&mut self, value: bool) {
        self.push_bit(value);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bits(value as u16 as u32, 16);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bits(value as u32, 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(value.to_bits(), 32);
    }

    /// Writes a length-prefixed UTF-8 string. Strings longer than `max_len` bytes are rejected
    /// rather than truncated, so a receiver never sees a silently shortened value.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<(), EncodeError> {
        let len = value.len();
        if len > max_len {
            return Err(EncodeError::StringTooLong { len, max: max_len });
        }
        self.write_bits(len as u32, bits_for_value(max_len as u32));
        for byte in value.as_bytes() {
            self.write_u8(*byte);
        }
        Ok(())
    }

    pub fn write_enum<E: WireEnum>(&mut self, value: E) {
        self.write_bits(value.to_index(), E::bits());
    }

    /// Writes the 8-bit element count that precedes every list.
    pub fn write_list_len(&mut self, len: usize) -> Result<(), EncodeError> {
        if len > u8::MAX as usize {
            return Err(EncodeError::ListTooLong {
                len,
                max: u8::MAX as usize,
            });
        }
        self.write_u8(len as u8);
        Ok(())
    }

    /// Number of bits written so far, excluding padding.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn bits_read(&self) -> usize {
        self.pos
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    pub fn read_bits(&mut self, bits: u8) -> Result<u32, DecodeError> {
        debug_assert!(bits <= 32, "cannot read more than 32 bits at once");
        let available = self.remaining_bits();
        if (bits as usize) > available {
            return Err(DecodeError::UnexpectedEnd {
                requested: bits as u32,
                available: available as u32,
            });
        }

        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_bits(32)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_bits(16)? as u16 as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_bits(32)? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_bits(32)?))
    }

    /// Reads a length-prefixed string, refusing lengths above `max_len` before allocating.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, DecodeError> {
        let len = self.read_bits(bits_for_value(max_len as u32))? as usize;
        if len > max_len {
            return Err(DecodeError::StringTooLong { len, max: max_len });
        }
        let available = self.remaining_bits();
        if len * 8 > available {
            return Err(DecodeError::UnexpectedEnd {
                requested: (len * 8) as u32,
                available: available as u32,
            });
        }

        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.read_u8()?);
        }
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_enum<E: WireEnum>(&mut self) -> Result<E, DecodeError> {
        let value = self.read_bits(E::bits())?;
        E::from_index(value).ok_or(DecodeError::InvalidEnum {
            name: E::NAME,
            value,
        })
    }

    pub fn read_list_len(&mut self) -> Result<usize, DecodeError> {
        Ok(self.read_u8()? as usize)
    }
}
