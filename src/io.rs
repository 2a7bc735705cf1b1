// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-level input/output abstraction the FST is encoded through.
//!
//! All fixed-width integers are big-endian; variable-length ints/longs use
//! the 7-bits-per-byte continuation encoding.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use error::ErrorKind::{IllegalArgument, IllegalState, UnexpectedEOF};
use error::Result;

use std::io::{self, Read, Write};

/// Read side of the stream abstraction.
pub trait DataInput: Read {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        if self.read(&mut buffer)? != 1 {
            bail!(UnexpectedEOF(
                "reached EOF when a single byte is expected".to_owned()
            ))
        } else {
            Ok(buffer[0])
        }
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset + length;
        if b.len() < end {
            bail!(IllegalArgument(format!(
                "buffer too small: writing [{}, {}) to [0, {})",
                offset,
                end,
                b.len(),
            )));
        }

        let mut blob = &mut b[offset..end];
        if self.read(&mut blob)? != length {
            bail!(UnexpectedEOF(format!(
                "reached EOF when {} bytes are expected",
                length
            )))
        } else {
            Ok(())
        }
    }

    fn read_short(&mut self) -> Result<i16> {
        Ok(self.read_i16::<BigEndian>()?)
    }

    fn read_int(&mut self) -> Result<i32> {
        Ok(self.read_i32::<BigEndian>()?)
    }

    fn read_long(&mut self) -> Result<i64> {
        Ok(self.read_i64::<BigEndian>()?)
    }

    fn read_vint(&mut self) -> Result<i32> {
        let mut b = self.read_byte()?;
        if b & 0x80 == 0 {
            return Ok(i32::from(b));
        }
        let mut i = i32::from(b & 0x7f);

        b = self.read_byte()?;
        i |= i32::from(b & 0x7f) << 7;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= i32::from(b & 0x7f) << 14;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= i32::from(b & 0x7f) << 21;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= i32::from(b & 0x0f) << 28;
        if b & 0xf0 == 0 {
            return Ok(i);
        }
        bail!(IllegalState("invalid vInt detected".to_owned()))
    }

    fn read_vlong(&mut self) -> Result<i64> {
        let mut b = self.read_byte()?;
        if b & 0x80 == 0 {
            return Ok(i64::from(b));
        }
        let mut i = i64::from(b & 0x7f);
        let mut shift = 7;
        while shift < 63 {
            b = self.read_byte()?;
            i |= i64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(i);
            }
            shift += 7;
        }
        bail!(IllegalState("invalid vLong detected".to_owned()))
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_vint()?;
        if length < 0 {
            bail!(IllegalState("invalid string length detected".to_owned()));
        }
        let mut buffer = vec![0u8; length as usize];
        self.read_exact(&mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        const SKIP_BUFFER_SIZE: usize = 1024;
        let mut skip_buffer = [0u8; SKIP_BUFFER_SIZE];
        let mut skipped = 0;
        while skipped < count {
            let step = ::std::cmp::min(SKIP_BUFFER_SIZE, count - skipped);
            self.read_bytes(&mut skip_buffer, 0, step)?;
            skipped += step;
        }
        Ok(())
    }
}

/// Write side of the stream abstraction.
pub trait DataOutput: Write {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_all(&[b])?;
        Ok(())
    }

    #[inline]
    fn write_bytes(&mut self, b: &[u8], offset: usize, length: usize) -> Result<()> {
        debug_assert!(offset + length <= b.len());
        self.write_all(&b[offset..offset + length])?;
        Ok(())
    }

    fn write_short(&mut self, i: i16) -> Result<()> {
        self.write_i16::<BigEndian>(i)?;
        Ok(())
    }

    fn write_int(&mut self, i: i32) -> Result<()> {
        self.write_i32::<BigEndian>(i)?;
        Ok(())
    }

    fn write_long(&mut self, i: i64) -> Result<()> {
        self.write_i64::<BigEndian>(i)?;
        Ok(())
    }

    fn write_vint(&mut self, i: i32) -> Result<()> {
        let mut i = i as u32;
        while (i & !0x7f_u32) != 0 {
            self.write_byte(((i & 0x7f) | 0x80) as u8)?;
            i >>= 7;
        }
        self.write_byte(i as u8)
    }

    fn write_vlong(&mut self, i: i64) -> Result<()> {
        if i < 0 {
            bail!(IllegalArgument("can't write negative vLong".to_owned()));
        }
        let mut i = i as u64;
        while (i & !0x7f_u64) != 0 {
            self.write_byte(((i & 0x7f) | 0x80) as u8)?;
            i >>= 7;
        }
        self.write_byte(i as u8)
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        let s = s.as_bytes();
        self.write_vint(s.len() as i32)?;
        self.write_all(s)?;
        Ok(())
    }

    // generic over the source, so only callable on a sized writer
    fn copy_bytes<I: DataInput + ?Sized>(&mut self, from: &mut I, len: usize) -> Result<()>
    where
        Self: Sized,
    {
        const COPY_BUFFER_SIZE: usize = 16384;
        let mut left = len;
        let mut copy_buffer = [0u8; COPY_BUFFER_SIZE];
        while left > 0 {
            let to_copy = ::std::cmp::min(left, COPY_BUFFER_SIZE);
            from.read_bytes(&mut copy_buffer, 0, to_copy)?;
            self.write_all(&copy_buffer[..to_copy])?;
            left -= to_copy;
        }
        Ok(())
    }
}

impl DataOutput for Vec<u8> {}

/// DataInput backed by a byte array.
///
/// *WARNING:* this type omits all low-level bounds checks.
pub struct ByteArrayDataInput<T: AsRef<[u8]>> {
    bytes: T,
    pos: usize,
}

impl<T: AsRef<[u8]>> ByteArrayDataInput<T> {
    pub fn new(bytes: T) -> ByteArrayDataInput<T> {
        ByteArrayDataInput { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn length(&self) -> usize {
        self.bytes.as_ref().len()
    }

    pub fn eof(&self) -> bool {
        self.pos == self.length()
    }
}

impl<T: AsRef<[u8]>> DataInput for ByteArrayDataInput<T> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self.bytes.as_ref()[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, len: usize) -> Result<()> {
        b[offset..offset + len].copy_from_slice(&self.bytes.as_ref()[self.pos..self.pos + len]);
        self.pos += len;
        Ok(())
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        self.pos += count;
        Ok(())
    }
}

impl<T: AsRef<[u8]>> Read for ByteArrayDataInput<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = ::std::cmp::min(buf.len(), self.length() - self.pos);
        buf[0..size].copy_from_slice(&self.bytes.as_ref()[self.pos..self.pos + size]);
        self.pos += size;
        Ok(size)
    }
}

/// DataOutput backed by a fixed byte slice; writing past the end is an error.
pub struct ByteArrayDataOutput<'a> {
    bytes: &'a mut [u8],
    pub pos: usize,
}

impl<'a> ByteArrayDataOutput<'a> {
    pub fn new(bytes: &'a mut [u8]) -> ByteArrayDataOutput<'a> {
        ByteArrayDataOutput { bytes, pos: 0 }
    }
}

impl<'a> DataOutput for ByteArrayDataOutput<'a> {}

impl<'a> Write for ByteArrayDataOutput<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos + buf.len() > self.bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "byte array output overflow",
            ));
        }
        self.bytes[self.pos..self.pos + buf.len()].copy_from_slice(buf);
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A `DataInput` with random access over the FST body, reading either
/// forward or backward depending on how the bytes were laid out.
pub trait BytesReader: DataInput {
    /// Current read position.
    fn position(&self) -> usize;

    /// Set the current read position.
    fn set_position(&mut self, pos: usize);

    /// True if this reader walks the bytes back-to-front.
    fn reversed(&self) -> bool;
}

/// `BytesReader` over one contiguous slice, in either direction.
pub struct DirectionalBytesReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    reversed: bool,
}

impl<'a> DirectionalBytesReader<'a> {
    pub fn new(bytes: &'a [u8], reversed: bool) -> DirectionalBytesReader<'a> {
        DirectionalBytesReader {
            bytes,
            pos: 0,
            reversed,
        }
    }
}

impl<'a> BytesReader for DirectionalBytesReader<'a> {
    fn position(&self) -> usize {
        self.pos
    }

    fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn reversed(&self) -> bool {
        self.reversed
    }
}

impl<'a> DataInput for DirectionalBytesReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self.bytes[self.pos];
        if self.reversed {
            // the final byte of a reversed range sits at index 0; saturate
            // there rather than underflowing
            if self.pos > 0 {
                self.pos -= 1;
            }
        } else {
            self.pos += 1;
        }
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.reversed {
            self.pos -= count;
        } else {
            self.pos += count;
        }
        Ok(())
    }
}

impl<'a> Read for DirectionalBytesReader<'a> {
    fn read(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let mut len = b.len();
        if self.reversed {
            if len > self.pos + 1 {
                len = self.pos + 1;
            }
            for v in b.iter_mut().take(len) {
                *v = self.bytes[self.pos];
                if self.pos > 0 {
                    self.pos -= 1;
                }
            }
        } else {
            let available = self.bytes.len() - self.pos;
            if available < len {
                len = available;
            }
            b[..len].copy_from_slice(&self.bytes[self.pos..self.pos + len]);
            self.pos += len;
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_round_trip() {
        let mut out: Vec<u8> = Vec::new();
        let values = [0, 1, 127, 128, 16383, 16384, 1 << 21, i32::max_value()];
        for v in &values {
            out.write_vint(*v).unwrap();
        }
        let mut input = ByteArrayDataInput::new(&out[..]);
        for v in &values {
            assert_eq!(input.read_vint().unwrap(), *v);
        }
        assert!(input.eof());
    }

    #[test]
    fn test_vlong_round_trip() {
        let mut out: Vec<u8> = Vec::new();
        let values = [0i64, 1, 127, 128, 1 << 35, i64::max_value()];
        for v in &values {
            out.write_vlong(*v).unwrap();
        }
        let mut input = ByteArrayDataInput::new(&out[..]);
        for v in &values {
            assert_eq!(input.read_vlong().unwrap(), *v);
        }
    }

    #[test]
    fn test_negative_vlong_rejected() {
        let mut out: Vec<u8> = Vec::new();
        assert!(out.write_vlong(-1).is_err());
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let mut out: Vec<u8> = Vec::new();
        out.write_short(0x0102).unwrap();
        // byteorder's extension traits also name a write_int/read_int, so
        // pick ours explicitly
        DataOutput::write_int(&mut out, 0x0304_0506).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);

        let mut input = ByteArrayDataInput::new(&out[..]);
        assert_eq!(input.read_short().unwrap(), 0x0102);
        assert_eq!(DataInput::read_int(&mut input).unwrap(), 0x0304_0506);
    }

    #[test]
    fn test_data_output_as_trait_object() {
        let mut out: Vec<u8> = Vec::new();
        {
            let writer: &mut dyn DataOutput = &mut out;
            writer.write_byte(7).unwrap();
            writer.write_vint(300).unwrap();
            writer.write_vlong(1 << 40).unwrap();
        }
        let mut input = ByteArrayDataInput::new(&out[..]);
        assert_eq!(input.read_byte().unwrap(), 7);
        assert_eq!(input.read_vint().unwrap(), 300);
        assert_eq!(input.read_vlong().unwrap(), 1 << 40);
    }

    #[test]
    fn test_copy_bytes() {
        let src: Vec<u8> = (0u8..200).collect();
        let mut input = ByteArrayDataInput::new(&src[..]);
        let mut out: Vec<u8> = Vec::new();
        out.copy_bytes(&mut input, src.len()).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_string_round_trip() {
        let mut out: Vec<u8> = Vec::new();
        out.write_string("FST").unwrap();
        let mut input = ByteArrayDataInput::new(&out[..]);
        assert_eq!(input.read_string().unwrap(), "FST");
    }

    #[test]
    fn test_byte_array_data_output_overflow() {
        let mut buf = [0u8; 2];
        let mut out = ByteArrayDataOutput::new(&mut buf);
        out.write_byte(1).unwrap();
        out.write_byte(2).unwrap();
        assert!(out.write_byte(3).is_err());
    }

    #[test]
    fn test_directional_reader_reverse() {
        let bytes = [1u8, 2, 3, 4, 5];
        let mut reader = DirectionalBytesReader::new(&bytes, true);
        reader.set_position(4);
        assert_eq!(reader.read_byte().unwrap(), 5);
        assert_eq!(reader.read_byte().unwrap(), 4);
        reader.skip_bytes(1).unwrap();
        assert_eq!(reader.read_byte().unwrap(), 2);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_directional_reader_forward() {
        let bytes = [1u8, 2, 3, 4, 5];
        let mut reader = DirectionalBytesReader::new(&bytes, false);
        assert_eq!(reader.read_byte().unwrap(), 1);
        reader.skip_bytes(2).unwrap();
        assert_eq!(reader.read_byte().unwrap(), 4);
    }
}
