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

//! A byte-compact finite state transducer term dictionary.
//!
//! Feed [`FstBuilder`] strictly increasing keys, each with an output value,
//! and it produces an [`FST`]: a minimal automaton whose arcs carry the
//! outputs, serialized on-the-fly into a flat byte image that can be
//! queried directly, saved to any [`DataOutput`] and loaded back. An
//! optional packing pass rewrites the image forward-ordered with
//! delta-coded targets for even smaller indexes.

#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

extern crate byteorder;
#[cfg(test)]
extern crate rand;

pub mod builder;
pub mod bytes_store;
pub mod codec;
pub mod error;
pub mod fst;
pub mod io;
pub mod outputs;
mod pack;
pub mod packed;

pub use builder::FstBuilder;
pub use error::{Error, ErrorKind, Result};
pub use fst::{Arc, CompiledAddress, InputType, Label, END_LABEL, FST};
pub use io::{BytesReader, DataInput, DataOutput};
pub use outputs::{ByteSequenceOutput, ByteSequenceOutputFactory, Output, OutputFactory,
                  PositiveIntOutput, PositiveIntOutputFactory};
