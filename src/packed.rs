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

//! Packed arrays of non-negative integers, bit-aligned over 64-bit blocks.
//!
//! The node-address table of a packed FST is stored in this format, headed
//! by its own codec header so it can be restored independently of the FST
//! version.

use codec;
use error::ErrorKind::CorruptIndex;
use error::Result;
use io::{DataInput, DataOutput};

use std::cmp::min;

pub const CODEC_NAME: &str = "PackedInts";
pub const VERSION_START: i32 = 2;
pub const VERSION_CURRENT: i32 = VERSION_START;

/// No memory overhead at all, but the returned implementation may be slower.
pub const COMPACT: f32 = 0.0;
/// At most 25% memory overhead, always select a reasonably fast
/// implementation.
pub const DEFAULT: f32 = 0.25;

/// Bits needed to store `v` as an unsigned value, at least 1.
pub fn unsigned_bits_required(v: i64) -> i32 {
    1.max(64 - v.leading_zeros() as i32)
}

pub fn bits_required(max_value: i64) -> i32 {
    debug_assert!(max_value >= 0, "max_value must be non-negative");
    unsigned_bits_required(max_value)
}

pub fn max_value(bits_per_value: i32) -> i64 {
    debug_assert!(bits_per_value > 0 && bits_per_value <= 64);
    if bits_per_value == 64 {
        i64::max_value()
    } else {
        (1i64 << bits_per_value).wrapping_sub(1)
    }
}

/// Pick a bit width for a mutable array of `bits_per_value`-sized entries,
/// trading up to `acceptable_overhead_ratio` extra bits per value for
/// byte-aligned (faster) access.
fn fastest_bits(bits_per_value: i32, acceptable_overhead_ratio: f32) -> i32 {
    let budget = bits_per_value + (acceptable_overhead_ratio * bits_per_value as f32) as i32;
    for width in &[8, 16, 32, 64] {
        if *width >= bits_per_value && *width <= budget {
            return *width;
        }
    }
    bits_per_value
}

pub fn get_mutable_by_ratio(
    value_count: usize,
    bits_per_value: i32,
    acceptable_overhead_ratio: f32,
) -> Packed64 {
    Packed64::new(
        value_count,
        fastest_bits(bits_per_value, acceptable_overhead_ratio),
    )
}

/// Fixed-size array of `value_count` entries of `bits_per_value` bits each,
/// packed contiguously most-significant-bit first.
pub struct Packed64 {
    value_count: usize,
    bits_per_value: i32,
    blocks: Vec<u64>,
    mask: u64,
}

impl Packed64 {
    pub fn new(value_count: usize, bits_per_value: i32) -> Packed64 {
        debug_assert!(bits_per_value > 0 && bits_per_value <= 64);
        let num_blocks = (value_count * bits_per_value as usize + 63) / 64;
        Packed64 {
            value_count,
            bits_per_value,
            blocks: vec![0u64; num_blocks],
            mask: if bits_per_value == 64 {
                u64::max_value()
            } else {
                (1u64 << bits_per_value) - 1
            },
        }
    }

    pub fn from_input<T: DataInput + ?Sized>(
        input: &mut T,
        value_count: usize,
        bits_per_value: i32,
    ) -> Result<Packed64> {
        let mut packed = Packed64::new(value_count, bits_per_value);
        let byte_count = (value_count * bits_per_value as usize + 7) / 8;
        let mut bytes = vec![0u8; byte_count];
        input.read_bytes(&mut bytes, 0, byte_count)?;
        for (i, b) in bytes.iter().enumerate() {
            packed.blocks[i / 8] |= u64::from(*b) << (56 - 8 * (i % 8));
        }
        Ok(packed)
    }

    pub fn size(&self) -> usize {
        self.value_count
    }

    pub fn get_bits_per_value(&self) -> i32 {
        self.bits_per_value
    }

    pub fn get(&self, index: usize) -> i64 {
        debug_assert!(index < self.value_count);
        let major_bit_pos = index * self.bits_per_value as usize;
        let element_pos = major_bit_pos >> 6;
        let end_bits =
            (major_bit_pos & 63) as i32 + self.bits_per_value - 64;
        if end_bits <= 0 {
            ((self.blocks[element_pos] >> (-end_bits)) & self.mask) as i64
        } else {
            (((self.blocks[element_pos] << end_bits)
                | (self.blocks[element_pos + 1] >> (64 - end_bits)))
                & self.mask) as i64
        }
    }

    pub fn set(&mut self, index: usize, value: i64) {
        debug_assert!(index < self.value_count);
        debug_assert!(unsigned_bits_required(value) <= self.bits_per_value);
        let value = value as u64;
        let major_bit_pos = index * self.bits_per_value as usize;
        let element_pos = major_bit_pos >> 6;
        let end_bits =
            (major_bit_pos & 63) as i32 + self.bits_per_value - 64;
        if end_bits <= 0 {
            self.blocks[element_pos] = (self.blocks[element_pos]
                & !(self.mask << (-end_bits)))
                | (value << (-end_bits));
        } else {
            self.blocks[element_pos] =
                (self.blocks[element_pos] & !(self.mask >> end_bits)) | (value >> end_bits);
            self.blocks[element_pos + 1] = (self.blocks[element_pos + 1]
                & (u64::max_value() >> end_bits))
                | (value << (64 - end_bits));
        }
    }

    pub fn fill(&mut self, from: usize, to: usize, val: i64) {
        debug_assert!(val <= max_value(self.bits_per_value));
        debug_assert!(from <= to);
        for i in from..to {
            self.set(i, val);
        }
    }

    /// Serialize, headed by the packed-ints codec header.
    pub fn save<T: DataOutput + ?Sized>(&self, out: &mut T) -> Result<()> {
        codec::write_header(out, CODEC_NAME, VERSION_CURRENT)?;
        out.write_vint(self.bits_per_value)?;
        out.write_vint(self.value_count as i32)?;
        // format id; only the contiguous format exists here
        out.write_vint(0)?;
        let byte_count = (self.value_count * self.bits_per_value as usize + 7) / 8;
        for i in 0..byte_count {
            let b = (self.blocks[i / 8] >> (56 - 8 * (i % 8))) as u8;
            out.write_byte(b)?;
        }
        Ok(())
    }
}

/// Restore a packed array previously written with `Packed64::save`.
pub fn get_reader<T: DataInput + ?Sized>(input: &mut T) -> Result<Packed64> {
    codec::check_header(input, CODEC_NAME, VERSION_START, VERSION_CURRENT)?;
    let bits_per_value = input.read_vint()?;
    if bits_per_value <= 0 || bits_per_value > 64 {
        bail!(CorruptIndex(format!(
            "invalid bits_per_value: {}",
            bits_per_value
        )));
    }
    let value_count = input.read_vint()?;
    if value_count < 0 {
        bail!(CorruptIndex(format!("invalid value_count: {}", value_count)));
    }
    let format = input.read_vint()?;
    if format != 0 {
        bail!(CorruptIndex(format!("invalid packed format id: {}", format)));
    }
    Packed64::from_input(input, value_count as usize, bits_per_value)
}

/// A packed array that grows its bit width as larger values get set.
pub struct GrowableWriter {
    current: Packed64,
    acceptable_overhead_ratio: f32,
}

impl GrowableWriter {
    pub fn new(start_bits_per_value: i32, value_count: usize, acceptable_overhead_ratio: f32) -> Self {
        GrowableWriter {
            current: get_mutable_by_ratio(
                value_count,
                start_bits_per_value,
                acceptable_overhead_ratio,
            ),
            acceptable_overhead_ratio,
        }
    }

    pub fn size(&self) -> usize {
        self.current.size()
    }

    pub fn get_bits_per_value(&self) -> i32 {
        self.current.get_bits_per_value()
    }

    pub fn get(&self, index: usize) -> i64 {
        self.current.get(index)
    }

    fn ensure_capacity(&mut self, value: i64) {
        let bits_required = unsigned_bits_required(value);
        if bits_required <= self.current.get_bits_per_value() {
            return;
        }
        let value_count = self.size();
        let mut next = get_mutable_by_ratio(
            value_count,
            bits_required,
            self.acceptable_overhead_ratio,
        );
        for i in 0..value_count {
            next.set(i, self.current.get(i));
        }
        self.current = next;
    }

    pub fn set(&mut self, index: usize, value: i64) {
        self.ensure_capacity(value);
        self.current.set(index, value);
    }

    /// Grow (or shrink) to `new_size` entries, keeping the shared prefix.
    pub fn resize(&mut self, new_size: usize) {
        let mut next = get_mutable_by_ratio(
            new_size,
            self.current.get_bits_per_value(),
            self.acceptable_overhead_ratio,
        );
        let limit = min(new_size, self.size());
        for i in 0..limit {
            next.set(i, self.current.get(i));
        }
        self.current = next;
    }

    pub fn save<T: DataOutput + ?Sized>(&self, out: &mut T) -> Result<()> {
        self.current.save(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use io::ByteArrayDataInput;

    #[test]
    fn test_packed64_set_get() {
        for &bits in &[1, 5, 8, 13, 31, 63, 64] {
            let count = 67;
            let mut packed = Packed64::new(count, bits);
            let max = max_value(bits);
            for i in 0..count {
                packed.set(i, (i as i64 * 31) % (max.saturating_add(1)).max(1) & max);
            }
            for i in 0..count {
                assert_eq!(
                    packed.get(i),
                    (i as i64 * 31) % (max.saturating_add(1)).max(1) & max,
                    "bits={} i={}",
                    bits,
                    i
                );
            }
        }
    }

    #[test]
    fn test_packed64_save_restore() {
        let mut packed = Packed64::new(41, 13);
        for i in 0..41 {
            packed.set(i, (i as i64 * 97) & max_value(13));
        }
        let mut out: Vec<u8> = Vec::new();
        packed.save(&mut out).unwrap();

        let mut input = ByteArrayDataInput::new(&out[..]);
        let restored = get_reader(&mut input).unwrap();
        assert_eq!(restored.size(), 41);
        for i in 0..41 {
            assert_eq!(restored.get(i), packed.get(i));
        }
    }

    #[test]
    fn test_growable_writer_grows_width() {
        let mut writer = GrowableWriter::new(2, 10, COMPACT);
        writer.set(0, 3);
        writer.set(1, 2);
        writer.set(2, 1 << 40);
        assert!(writer.get_bits_per_value() >= 41);
        assert_eq!(writer.get(0), 3);
        assert_eq!(writer.get(1), 2);
        assert_eq!(writer.get(2), 1 << 40);
    }

    #[test]
    fn test_growable_writer_resize() {
        let mut writer = GrowableWriter::new(8, 4, COMPACT);
        for i in 0..4 {
            writer.set(i, i as i64 + 10);
        }
        writer.resize(16);
        assert_eq!(writer.size(), 16);
        for i in 0..4 {
            assert_eq!(writer.get(i), i as i64 + 10);
        }
        assert_eq!(writer.get(10), 0);
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 1);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(2), 2);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
    }
}
