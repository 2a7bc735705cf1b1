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

//! Output algebra attached to FST arcs.
//!
//! Outputs must form a structure where any two values have a common prefix,
//! values can be subtracted from and appended to each other, and the empty
//! value is both the identity for `cat` and the result of subtracting a
//! value from itself. The builder pushes outputs toward the root using
//! exactly these operations.

use error::Result;
use io::{DataInput, DataOutput};

use std::cmp::min;
use std::fmt::Debug;
use std::hash::Hash;

pub trait Output: Clone + Eq + Hash + Debug {
    type Value;

    /// Longest common prefix of `self` and `other`.
    fn prefix(&self, other: &Self) -> Self;

    /// Concatenation, returning a new value.
    fn cat(&self, other: &Self) -> Self;

    /// In-place append.
    fn concat(&mut self, other: &Self);

    /// Remove the prefix `other` from `self`. `other` must be a prefix of
    /// `self`.
    fn subtract(&self, other: &Self) -> Self;

    fn is_empty(&self) -> bool;

    fn value(&self) -> Self::Value;
}

pub trait OutputFactory: Clone {
    type Value: Output;

    /// Return an empty output.
    fn empty(&self) -> Self::Value;

    fn common(&self, o1: &Self::Value, o2: &Self::Value) -> Self::Value;

    fn subtract(&self, o1: &Self::Value, o2: &Self::Value) -> Self::Value;

    fn add(&self, prefix: &Self::Value, output: &Self::Value) -> Self::Value;

    /// Decode an output value previously written with `write`.
    fn read<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<Self::Value>;

    /// Encode an output value into a `DataOutput`.
    fn write<T: DataOutput + ?Sized>(&self, output: &Self::Value, data_out: &mut T) -> Result<()>;

    /// Encode a final node's output value into a `DataOutput`.
    /// By default this just calls `write`.
    fn write_final_output<T: DataOutput + ?Sized>(
        &self,
        output: &Self::Value,
        data_out: &mut T,
    ) -> Result<()> {
        self.write(output, data_out)
    }

    /// Decode an output value previously written with `write_final_output`.
    /// By default this just calls `read`.
    fn read_final_output<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<Self::Value> {
        self.read(data_in)
    }

    /// Skip the output previously written with `write_final_output`,
    /// defaults to just calling `read_final_output` and discarding the result.
    fn skip_final_output<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<()> {
        self.skip_output(data_in)
    }

    /// Skip the output; defaults to just calling `read`
    /// and discarding the result.
    fn skip_output<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<()> {
        self.read(data_in).map(|_| ())
    }
}

/// Arbitrary byte sequence output. The empty sequence is the no-output
/// value.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct ByteSequenceOutput {
    bytes: Vec<u8>,
}

impl ByteSequenceOutput {
    pub fn new(bytes: Vec<u8>) -> ByteSequenceOutput {
        ByteSequenceOutput { bytes }
    }

    pub fn empty() -> ByteSequenceOutput {
        ByteSequenceOutput { bytes: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn inner(&self) -> &[u8] {
        &self.bytes
    }

    fn starts_with(&self, other: &ByteSequenceOutput) -> bool {
        self.bytes.starts_with(&other.bytes)
    }
}

impl Into<Vec<u8>> for ByteSequenceOutput {
    fn into(self) -> Vec<u8> {
        self.bytes
    }
}

impl Output for ByteSequenceOutput {
    type Value = Vec<u8>;

    fn prefix(&self, other: &ByteSequenceOutput) -> ByteSequenceOutput {
        let stop = min(self.bytes.len(), other.bytes.len());
        let mut pos = 0;
        while pos < stop && self.bytes[pos] == other.bytes[pos] {
            pos += 1;
        }

        if pos == 0 {
            ByteSequenceOutput::empty()
        } else if pos == self.bytes.len() {
            self.clone()
        } else if pos == other.bytes.len() {
            other.clone()
        } else {
            ByteSequenceOutput::new(self.bytes[0..pos].to_vec())
        }
    }

    fn cat(&self, other: &ByteSequenceOutput) -> ByteSequenceOutput {
        if self.is_empty() {
            other.clone()
        } else if other.is_empty() {
            self.clone()
        } else {
            let mut result = Vec::with_capacity(self.bytes.len() + other.bytes.len());
            result.extend(&self.bytes);
            result.extend(&other.bytes);
            ByteSequenceOutput::new(result)
        }
    }

    fn concat(&mut self, other: &ByteSequenceOutput) {
        self.bytes.extend(&other.bytes);
    }

    fn subtract(&self, other: &ByteSequenceOutput) -> ByteSequenceOutput {
        if other.is_empty() {
            return self.clone();
        }
        debug_assert!(self.starts_with(other));

        if self.bytes.len() == other.bytes.len() {
            ByteSequenceOutput::empty()
        } else {
            ByteSequenceOutput::new(self.bytes[other.bytes.len()..].to_vec())
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    fn value(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

#[derive(Copy, Clone, Default)]
pub struct ByteSequenceOutputFactory;

impl ByteSequenceOutputFactory {
    pub fn new() -> ByteSequenceOutputFactory {
        ByteSequenceOutputFactory
    }
}

impl OutputFactory for ByteSequenceOutputFactory {
    type Value = ByteSequenceOutput;

    fn empty(&self) -> ByteSequenceOutput {
        ByteSequenceOutput::empty()
    }

    fn common(&self, o1: &ByteSequenceOutput, o2: &ByteSequenceOutput) -> ByteSequenceOutput {
        o1.prefix(o2)
    }

    fn subtract(&self, o1: &ByteSequenceOutput, o2: &ByteSequenceOutput) -> ByteSequenceOutput {
        o1.subtract(o2)
    }

    fn add(&self, prefix: &ByteSequenceOutput, output: &ByteSequenceOutput) -> ByteSequenceOutput {
        prefix.cat(output)
    }

    fn read<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<ByteSequenceOutput> {
        let len = data_in.read_vint()?;
        if len != 0 {
            let len = len as usize;
            let mut buffer = vec![0u8; len];
            data_in.read_bytes(&mut buffer, 0, len)?;
            Ok(ByteSequenceOutput::new(buffer))
        } else {
            Ok(self.empty())
        }
    }

    fn write<T: DataOutput + ?Sized>(
        &self,
        output: &ByteSequenceOutput,
        data_out: &mut T,
    ) -> Result<()> {
        data_out.write_vint(output.bytes.len() as i32)?;
        data_out.write_bytes(&output.bytes, 0, output.bytes.len())
    }
}

/// Non-negative integer output, summed along a path. Zero is the no-output
/// value, so zero-valued keys are indistinguishable from keys with no
/// output.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct PositiveIntOutput(i64);

impl PositiveIntOutput {
    pub fn new(v: i64) -> PositiveIntOutput {
        debug_assert!(v >= 0);
        PositiveIntOutput(v)
    }

    pub fn empty() -> PositiveIntOutput {
        PositiveIntOutput(0)
    }
}

impl Output for PositiveIntOutput {
    type Value = i64;

    fn prefix(&self, other: &PositiveIntOutput) -> PositiveIntOutput {
        PositiveIntOutput(min(self.0, other.0))
    }

    fn cat(&self, other: &PositiveIntOutput) -> PositiveIntOutput {
        PositiveIntOutput(self.0 + other.0)
    }

    fn concat(&mut self, other: &PositiveIntOutput) {
        self.0 += other.0;
    }

    fn subtract(&self, other: &PositiveIntOutput) -> PositiveIntOutput {
        debug_assert!(other.0 <= self.0);
        PositiveIntOutput(self.0 - other.0)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn value(&self) -> i64 {
        self.0
    }
}

#[derive(Copy, Clone, Default)]
pub struct PositiveIntOutputFactory;

impl PositiveIntOutputFactory {
    pub fn new() -> PositiveIntOutputFactory {
        PositiveIntOutputFactory
    }
}

impl OutputFactory for PositiveIntOutputFactory {
    type Value = PositiveIntOutput;

    fn empty(&self) -> PositiveIntOutput {
        PositiveIntOutput::empty()
    }

    fn common(&self, o1: &PositiveIntOutput, o2: &PositiveIntOutput) -> PositiveIntOutput {
        o1.prefix(o2)
    }

    fn subtract(&self, o1: &PositiveIntOutput, o2: &PositiveIntOutput) -> PositiveIntOutput {
        o1.subtract(o2)
    }

    fn add(&self, prefix: &PositiveIntOutput, output: &PositiveIntOutput) -> PositiveIntOutput {
        prefix.cat(output)
    }

    fn read<T: DataInput + ?Sized>(&self, data_in: &mut T) -> Result<PositiveIntOutput> {
        Ok(PositiveIntOutput(data_in.read_vlong()?))
    }

    fn write<T: DataOutput + ?Sized>(
        &self,
        output: &PositiveIntOutput,
        data_out: &mut T,
    ) -> Result<()> {
        data_out.write_vlong(output.0)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use io::ByteArrayDataInput;

    #[test]
    fn test_prefix() {
        {
            let output1 = ByteSequenceOutput::new(vec![1, 2, 3, 4, 5]);
            let output2 = ByteSequenceOutput::new(vec![1, 2, 4, 5, 6]);
            let result = output1.prefix(&output2);
            assert_eq!(result.inner(), &[1, 2]);
        }
        {
            let output1 = ByteSequenceOutput::new(vec![]);
            let output2 = ByteSequenceOutput::new(vec![1, 2, 4, 5, 6]);
            let result = output1.prefix(&output2);
            assert!(result.is_empty());
        }
    }

    #[test]
    fn test_cat() {
        {
            let output1 = ByteSequenceOutput::new(vec![1, 2, 3]);
            let output2 = ByteSequenceOutput::new(vec![4, 5]);
            let result = output1.cat(&output2);
            assert_eq!(result.inner(), &[1, 2, 3, 4, 5]);
        }
        {
            let output1 = ByteSequenceOutput::new(vec![]);
            let output2 = ByteSequenceOutput::new(vec![4, 5]);
            let result = output1.cat(&output2);
            assert_eq!(result.inner(), &[4, 5]);
        }
    }

    #[test]
    fn test_subtract() {
        {
            let output1 = ByteSequenceOutput::new(vec![1, 2, 3, 4, 5]);
            let output2 = ByteSequenceOutput::new(vec![1, 2]);
            let result = output1.subtract(&output2);
            assert_eq!(result.inner(), &[3, 4, 5]);
        }
        {
            let output1 = ByteSequenceOutput::new(vec![1, 2, 3, 4, 5]);
            let output2 = ByteSequenceOutput::new(vec![]);
            let result = output1.subtract(&output2);
            assert_eq!(result.inner(), &[1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_read_write() {
        let mut bytes: Vec<u8> = Vec::new();
        let output = ByteSequenceOutput::new(vec![1, 2, 3, 4, 5]);
        let output_factory = ByteSequenceOutputFactory::new();
        output_factory.write(&output, &mut bytes).unwrap();
        assert_eq!(bytes, vec![5, 1, 2, 3, 4, 5]);

        let mut input = ByteArrayDataInput::new(&bytes[..]);
        let restored = output_factory.read(&mut input).unwrap();
        assert_eq!(restored, output);
    }

    #[test]
    fn test_positive_int_algebra() {
        let f = PositiveIntOutputFactory::new();
        let a = PositiveIntOutput::new(7);
        let b = PositiveIntOutput::new(12);
        assert_eq!(f.common(&a, &b), PositiveIntOutput::new(7));
        assert_eq!(f.subtract(&b, &a), PositiveIntOutput::new(5));
        assert_eq!(f.add(&a, &b), PositiveIntOutput::new(19));
        assert!(f.empty().is_empty());
        assert_eq!(f.subtract(&a, &a), f.empty());
    }

    #[test]
    fn test_positive_int_read_write() {
        let f = PositiveIntOutputFactory::new();
        let mut bytes: Vec<u8> = Vec::new();
        f.write(&PositiveIntOutput::new(300), &mut bytes).unwrap();
        let mut input = ByteArrayDataInput::new(&bytes[..]);
        assert_eq!(f.read(&mut input).unwrap().value(), 300);
    }
}
