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

//! Growable byte buffer paged into power-of-two blocks.
//!
//! The FST body is appended here while building. Besides plain appends the
//! builder needs a few in-place edits: rewriting already-written bytes when
//! a node gets expanded to the fixed-array layout, reversing a node's byte
//! range, and truncating a failed retry. All of those address the store by
//! absolute position.

use error::Result;
use io::{BytesReader, DataInput, DataOutput};

use std::io::{self, Read, Write};

/// Block size used for FST bodies built in memory.
pub const DEFAULT_BLOCK_BITS: usize = 15;

pub struct BytesStore {
    block_bits: usize,
    block_size: usize,
    block_mask: usize,
    blocks: Vec<Vec<u8>>,
}

impl BytesStore {
    pub fn with_block_bits(block_bits: usize) -> BytesStore {
        debug_assert!(block_bits >= 1 && block_bits <= 30);
        BytesStore {
            block_bits,
            block_size: 1 << block_bits,
            block_mask: (1 << block_bits) - 1,
            blocks: vec![],
        }
    }

    /// Absorb up to `size` bytes from `input`, sizing blocks so that at most
    /// one block is allocated when the data fits.
    pub fn from_input<T: DataInput + ?Sized>(input: &mut T, size: usize) -> Result<BytesStore> {
        let mut block_bits = 1;
        while block_bits < 30 && (1usize << block_bits) < size {
            block_bits += 1;
        }
        let mut store = BytesStore::with_block_bits(block_bits);
        let mut left = size;
        while left > 0 {
            let chunk = ::std::cmp::min(store.block_size, left);
            let mut block = vec![0u8; chunk];
            input.read_bytes(&mut block, 0, chunk)?;
            store.blocks.push(block);
            left -= chunk;
        }
        Ok(store)
    }

    pub fn block_bits(&self) -> usize {
        self.block_bits
    }

    /// Next write position, which is also the number of bytes written.
    pub fn get_position(&self) -> usize {
        match self.blocks.last() {
            Some(last) => ((self.blocks.len() - 1) << self.block_bits) + last.len(),
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.get_position()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn get_byte(&self, pos: usize) -> u8 {
        self.blocks[pos >> self.block_bits][pos & self.block_mask]
    }

    fn set_byte(&mut self, pos: usize, b: u8) {
        let (block_bits, block_mask) = (self.block_bits, self.block_mask);
        self.blocks[pos >> block_bits][pos & block_mask] = b;
    }

    fn push_byte(&mut self, b: u8) {
        let need_new_block = match self.blocks.last() {
            Some(last) => last.len() == self.block_size,
            None => true,
        };
        if need_new_block {
            let block = Vec::with_capacity(self.block_size);
            self.blocks.push(block);
        }
        self.blocks.last_mut().unwrap().push(b);
    }

    /// Absolute-position write over bytes already appended.
    pub fn write_byte_local(&mut self, dest: usize, b: u8) {
        debug_assert!(dest < self.get_position());
        self.set_byte(dest, b);
    }

    /// Absolute-position write of a slice over bytes already appended.
    pub fn write_bytes_local(&mut self, dest: usize, bytes: &[u8], offset: usize, len: usize) {
        debug_assert!(dest + len <= self.get_position());
        for i in 0..len {
            self.set_byte(dest + i, bytes[offset + i]);
        }
    }

    /// Absolute-position copy within the store. The ranges may overlap; the
    /// copy direction is chosen so overlapping moves stay correct.
    pub fn copy_bytes_local(&mut self, src: usize, dest: usize, len: usize) {
        debug_assert!(src + len <= self.get_position());
        debug_assert!(dest + len <= self.get_position());
        if dest > src {
            for i in (0..len).rev() {
                let b = self.get_byte(src + i);
                self.set_byte(dest + i, b);
            }
        } else {
            for i in 0..len {
                let b = self.get_byte(src + i);
                self.set_byte(dest + i, b);
            }
        }
    }

    /// Write a big-endian i32 at an absolute position over bytes already
    /// appended.
    pub fn write_int_local(&mut self, dest: usize, value: i32) {
        let bytes = [
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ];
        self.write_bytes_local(dest, &bytes, 0, 4);
    }

    /// Reverse the bytes in the inclusive range `[src_pos, dest_pos]`.
    pub fn reverse(&mut self, src_pos: usize, dest_pos: usize) {
        debug_assert!(src_pos <= dest_pos);
        debug_assert!(dest_pos < self.get_position());
        let mut left = src_pos;
        let mut right = dest_pos;
        while left < right {
            let b = self.get_byte(left);
            self.set_byte(left, self.get_byte(right));
            self.set_byte(right, b);
            left += 1;
            right -= 1;
        }
    }

    /// Append `len` zero bytes, reserving space for a later in-place write.
    pub fn skip_bytes(&mut self, len: usize) {
        for _ in 0..len {
            self.push_byte(0);
        }
    }

    /// Discard everything at or past `new_len`. Used to retry a node write.
    pub fn truncate(&mut self, new_len: usize) {
        debug_assert!(new_len <= self.get_position());
        let block_index = new_len >> self.block_bits;
        let within = new_len & self.block_mask;
        if within == 0 {
            self.blocks.truncate(block_index);
        } else {
            self.blocks.truncate(block_index + 1);
            self.blocks[block_index].truncate(within);
        }
        debug_assert_eq!(new_len, self.get_position());
    }

    /// Release the unused tail capacity of the last block.
    pub fn finish(&mut self) {
        if let Some(last) = self.blocks.last_mut() {
            last.shrink_to_fit();
        }
    }

    /// Copy all written bytes to `out`.
    pub fn write_to<T: DataOutput + ?Sized>(&self, out: &mut T) -> Result<()> {
        for block in &self.blocks {
            out.write_bytes(block, 0, block.len())?;
        }
        Ok(())
    }

    pub fn get_forward_reader(&self) -> StoreBytesReader {
        StoreBytesReader::new(self, false)
    }

    pub fn get_reverse_reader(&self) -> StoreBytesReader {
        StoreBytesReader::new(self, true)
    }
}

impl Write for BytesStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for b in buf {
            self.push_byte(*b);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataOutput for BytesStore {}

/// Reader borrowing the store, walking it forward or backward.
pub struct StoreBytesReader<'a> {
    store: &'a BytesStore,
    pos: usize,
    reversed: bool,
}

impl<'a> StoreBytesReader<'a> {
    fn new(store: &'a BytesStore, reversed: bool) -> StoreBytesReader<'a> {
        StoreBytesReader {
            store,
            pos: 0,
            reversed,
        }
    }
}

impl<'a> BytesReader for StoreBytesReader<'a> {
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

impl<'a> DataInput for StoreBytesReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self.store.get_byte(self.pos);
        if self.reversed {
            // position 0 holds the last byte of a reversed node; saturate
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

impl<'a> Read for StoreBytesReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut len = buf.len();
        if self.reversed {
            if len > self.pos + 1 {
                len = self.pos + 1;
            }
            for v in buf.iter_mut().take(len) {
                *v = self.store.get_byte(self.pos);
                if self.pos > 0 {
                    self.pos -= 1;
                }
            }
        } else {
            let available = self.store.len() - self.pos;
            if available < len {
                len = available;
            }
            for (i, v) in buf.iter_mut().take(len).enumerate() {
                *v = self.store.get_byte(self.pos + i);
            }
            self.pos += len;
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_store(block_bits: usize, len: usize) -> BytesStore {
        let mut store = BytesStore::with_block_bits(block_bits);
        for i in 0..len {
            store.write_byte((i % 251) as u8).unwrap();
        }
        store
    }

    #[test]
    fn test_append_across_blocks() {
        let store = filled_store(4, 100);
        assert_eq!(store.get_position(), 100);
        let mut reader = store.get_forward_reader();
        for i in 0..100 {
            assert_eq!(reader.read_byte().unwrap(), (i % 251) as u8);
        }
        assert_eq!(reader.position(), 100);
    }

    #[test]
    fn test_reverse_reader() {
        let store = filled_store(3, 40);
        let mut reader = store.get_reverse_reader();
        assert!(reader.reversed());
        reader.set_position(39);
        for i in (0..40).rev() {
            assert_eq!(reader.read_byte().unwrap(), (i % 251) as u8);
        }
    }

    #[test]
    fn test_reverse_range() {
        let mut store = BytesStore::with_block_bits(2);
        for b in 0..10u8 {
            store.write_byte(b).unwrap();
        }
        store.reverse(2, 7);
        let mut reader = store.get_forward_reader();
        let mut got = vec![0u8; 10];
        reader.read_bytes(&mut got, 0, 10).unwrap();
        assert_eq!(got, vec![0, 1, 7, 6, 5, 4, 3, 2, 8, 9]);
    }

    #[test]
    fn test_local_writes() {
        let mut store = filled_store(3, 20);
        store.write_byte_local(0, 0xAB);
        store.write_bytes_local(9, &[1, 2, 3], 0, 3);
        store.write_int_local(14, 0x0102_0304);

        let mut reader = store.get_forward_reader();
        assert_eq!(reader.read_byte().unwrap(), 0xAB);
        reader.set_position(9);
        assert_eq!(reader.read_byte().unwrap(), 1);
        assert_eq!(reader.read_byte().unwrap(), 2);
        assert_eq!(reader.read_byte().unwrap(), 3);
        reader.set_position(14);
        assert_eq!(reader.read_int().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_copy_bytes_local_overlapping() {
        let mut store = BytesStore::with_block_bits(3);
        for b in 0..16u8 {
            store.write_byte(b).unwrap();
        }
        // shift [0, 8) forward by 4, overlapping
        store.copy_bytes_local(0, 4, 8);
        let mut reader = store.get_forward_reader();
        let mut got = vec![0u8; 16];
        reader.read_bytes(&mut got, 0, 16).unwrap();
        assert_eq!(got, vec![0, 1, 2, 3, 0, 1, 2, 3, 4, 5, 6, 7, 12, 13, 14, 15]);
    }

    #[test]
    fn test_skip_and_truncate() {
        let mut store = filled_store(3, 10);
        store.skip_bytes(10);
        assert_eq!(store.get_position(), 20);
        store.truncate(13);
        assert_eq!(store.get_position(), 13);
        store.truncate(8);
        assert_eq!(store.get_position(), 8);
        store.write_byte(42).unwrap();
        assert_eq!(store.get_position(), 9);
        let mut reader = store.get_forward_reader();
        reader.set_position(8);
        assert_eq!(reader.read_byte().unwrap(), 42);
    }

    #[test]
    fn test_from_input_round_trip() {
        let store = filled_store(5, 200);
        let mut out: Vec<u8> = Vec::new();
        store.write_to(&mut out).unwrap();
        assert_eq!(out.len(), 200);

        let mut input = ::io::ByteArrayDataInput::new(&out[..]);
        let restored = BytesStore::from_input(&mut input, 200).unwrap();
        assert_eq!(restored.get_position(), 200);
        let mut reader = restored.get_forward_reader();
        for i in 0..200 {
            assert_eq!(reader.read_byte().unwrap(), (i % 251) as u8);
        }
    }

    #[test]
    fn test_vlong_through_store() {
        let mut store = BytesStore::with_block_bits(2);
        store.write_vlong(1234567).unwrap();
        store.write_vlong(7).unwrap();
        let mut reader = store.get_forward_reader();
        assert_eq!(reader.read_vlong().unwrap(), 1234567);
        assert_eq!(reader.read_vlong().unwrap(), 7);
    }
}
