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

//! The compiled transducer: an append-only byte image plus the cursor
//! operations that walk it.
//!
//! Nodes have no header of their own; a node is just the address of its
//! first arc. Per-node the arcs are laid out either back-to-back for a
//! linear scan, or as a fixed-stride array for binary search. A freshly
//! built automaton stores each node's bytes reversed and is walked with a
//! reverse reader; a packed automaton stores them forward.

use std::cmp::max;
use std::io;

use builder::{Node, UnCompiledNode};
use bytes_store::{BytesStore, StoreBytesReader};
use codec::{check_header, write_header};
use io::{ByteArrayDataOutput, BytesReader, DataInput, DataOutput, DirectionalBytesReader};
use outputs::{Output, OutputFactory};
use packed::{GrowableWriter, Packed64};
use error::{ErrorKind, Result};

pub const BIT_FINAL_ARC: u8 = 1;
pub const BIT_LAST_ARC: u8 = 1 << 1;
pub const BIT_TARGET_NEXT: u8 = 1 << 2;
pub const BIT_STOP_NODE: u8 = 1 << 3;
pub const BIT_ARC_HAS_OUTPUT: u8 = 1 << 4;
pub const BIT_ARC_HAS_FINAL_OUTPUT: u8 = 1 << 5;

/// Only set in a packed automaton: the target is delta coded against the
/// current read position instead of being absolute or table-indexed.
pub const BIT_TARGET_DELTA: u8 = 1 << 6;

/// Marker flags byte opening a fixed-array node. This single flag is
/// illegal on a real arc, so it is unambiguous.
pub const ARCS_AS_FIXED_ARRAY: u8 = BIT_ARC_HAS_FINAL_OUTPUT;

const FIXED_ARRAY_SHALLOW_DISTANCE: i32 = 3;
const FIXED_ARRAY_NUM_ARCS_SHALLOW: usize = 5;
const FIXED_ARRAY_NUM_ARCS_DEEP: usize = 10;
const FILE_FORMAT_NAME: &str = "FST";

/// First version able to hold a packed automaton.
const VERSION_PACKED: i32 = 3;
/// Absolute arc targets changed from fixed int to vlong.
const VERSION_VINT_TARGET: i32 = 4;
const VERSION_CURRENT: i32 = VERSION_VINT_TARGET;

pub const FINAL_END_NODE: CompiledAddress = -1;
pub const NON_FINAL_END_NODE: CompiledAddress = 0;

/// Only works on 64bit os
const DEFAULT_MAX_BLOCK_BITS: usize = 30;

/// Pseudo label consuming no input, used to step into a node's own final
/// state.
pub const END_LABEL: Label = -1;

fn flag(flags: u8, bit: u8) -> bool {
    (flags & bit) != 0
}

pub type Label = i32;
pub type CompiledAddress = i64;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InputType {
    Byte1,
    Byte2,
    Byte4,
}

#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct Arc<T: Output> {
    pub flags: u8,
    pub label: Label,
    pub output: Option<T>,
    pub next_final_output: Option<T>,
    pub next_arc: Option<CompiledAddress>,
    /// Node this arc leaves. While building toward a pack this is an
    /// ordinal, not an address; `BIT_TARGET_NEXT` then means the node
    /// frozen right before it, `from_node - 1`.
    pub from_node: CompiledAddress,
    /// To node
    pub target: CompiledAddress,
    /// Where the first arc in the array starts; only valid if bytesPerArc != 0.
    pub arc_start_position: usize,

    /// Non-zero if this arc is part of an array, which means all
    /// arcs for the node are encoded with a fixed number of bytes so
    /// that we can random access by index.  We do when there are enough
    /// arcs leaving one node.  It wastes some bytes but gives faster lookups.
    pub bytes_per_arc: usize,

    /// Where we are in the array; only valid if bytesPerArc != 0.
    pub arc_index: usize,

    /// How many arcs in the array; only valid if bytesPerArc != 0.
    pub num_arcs: usize,
}

impl<T: Output> Arc<T> {
    pub fn empty() -> Arc<T> {
        Arc {
            flags: 0u8,
            label: 0i32,
            output: None,
            next_final_output: None,
            next_arc: None,
            from_node: 0,
            target: 0,
            arc_start_position: 0,
            bytes_per_arc: 0,
            arc_index: 0,
            num_arcs: 0,
        }
    }

    pub fn is_last(&self) -> bool {
        flag(self.flags, BIT_LAST_ARC)
    }

    pub fn is_final(&self) -> bool {
        flag(self.flags, BIT_FINAL_ARC)
    }

    fn copy_from(&mut self, other: &Arc<T>) {
        self.flags = other.flags;
        self.label = other.label;
        self.output = other.output.clone();
        self.next_final_output = other.next_final_output.clone();
        self.next_arc = other.next_arc;
        self.from_node = other.from_node;
        self.target = other.target;
        self.bytes_per_arc = other.bytes_per_arc;
        if self.bytes_per_arc > 0 {
            self.arc_start_position = other.arc_start_position;
            self.arc_index = other.arc_index;
            self.num_arcs = other.num_arcs;
        }
    }
}

struct LabelStream<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> LabelStream<'a> {
    fn new(bytes: &'a [u8]) -> LabelStream {
        LabelStream { bytes, offset: 0 }
    }
}

impl<'a> Iterator for LabelStream<'a> {
    type Item = Label;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            None
        } else {
            let label = self.bytes[self.offset];
            self.offset += 1;
            Some(Label::from(label))
        }
    }
}

pub struct FST<F: OutputFactory> {
    pub input_type: InputType,
    // if non-none, this FST accepts the empty string and
    // produces this output
    pub empty_output: Option<F::Value>,
    // used during building, or during reading when
    // the FST is very large (more than 1 GB).  If the FST is less than 1
    // GB then bytesArray is set instead.
    pub bytes_store: BytesStore,
    // Used at read time when the FST fits into a single Vec<u8>.
    bytes_array: Vec<u8>,
    // flag of whether use bytes_store or bytes_array
    use_bytes_array: bool,
    pub start_node: CompiledAddress,
    version: i32,
    output_factory: F,
    cached_root_arcs: Vec<Option<Arc<F::Value>>>,
    // set when restored via `from_input`
    loaded: bool,

    /// True once the byte image is in packed (forward-read) form.
    pub packed: bool,
    /// Packed automaton only: maps the most-referenced node ordinals to
    /// their real addresses.
    pub node_ref_to_address: Option<Packed64>,
    /// Building toward a pack only: maps node ordinal to address; ordinals
    /// start at 1.
    pub node_address: Option<GrowableWriter>,
    /// Building toward a pack only: incoming-arc count per node ordinal.
    pub in_counts: Option<GrowableWriter>,

    pub node_count: i64,
    pub arc_count: i64,
    pub arc_with_output_count: i64,
}

impl<F: OutputFactory> FST<F> {
    pub fn new(input_type: InputType, output_factory: F, bytes_page_bits: usize) -> Self {
        FST::new_packable(input_type, output_factory, false, 0.0, bytes_page_bits)
    }

    /// `will_pack_later` keeps the per-node bookkeeping (ordinal address
    /// table, incoming-arc counts) a later `pack` call needs.
    pub fn new_packable(
        input_type: InputType,
        output_factory: F,
        will_pack_later: bool,
        acceptable_overhead_ratio: f32,
        bytes_page_bits: usize,
    ) -> Self {
        let mut bytes_store = BytesStore::with_block_bits(bytes_page_bits);
        // pad byte; addresses 0 and -1 are the sentinel nodes
        let _ = bytes_store.write_byte(0);
        let (node_address, in_counts) = if will_pack_later {
            (
                Some(GrowableWriter::new(15, 8, acceptable_overhead_ratio)),
                Some(GrowableWriter::new(1, 8, acceptable_overhead_ratio)),
            )
        } else {
            (None, None)
        };
        FST {
            input_type,
            empty_output: None,
            bytes_store,
            bytes_array: Vec::with_capacity(0),
            use_bytes_array: false,
            start_node: -1,
            version: VERSION_CURRENT,
            output_factory,
            cached_root_arcs: Vec::with_capacity(0),
            loaded: false,
            packed: false,
            node_ref_to_address: None,
            node_address,
            in_counts,
            node_count: 0,
            arc_count: 0,
            arc_with_output_count: 0,
        }
    }

    /// Used by `pack` for the automaton it rebuilds.
    pub fn new_packed(input_type: InputType, output_factory: F, bytes_page_bits: usize) -> Self {
        let mut fst = FST::new(input_type, output_factory, bytes_page_bits);
        fst.packed = true;
        fst
    }

    pub fn from_input<I: DataInput + ?Sized>(data_in: &mut I, output_factory: F) -> Result<Self> {
        let max_block_bits = DEFAULT_MAX_BLOCK_BITS;

        // Only reads most recent formats; we don't have
        // back-compat promise for FSTs (they are experimental):
        let version = check_header(data_in, FILE_FORMAT_NAME, VERSION_PACKED, VERSION_CURRENT)?;
        let packed = data_in.read_byte()? == 1;

        let empty_output = if data_in.read_byte()? == 1 {
            // Accepts empty string
            let num_bytes = data_in.read_vint()? as usize;
            let mut blob = vec![0u8; num_bytes];
            data_in.read_bytes(&mut blob, 0, num_bytes)?;

            // the empty-string output was written reversed unless packed
            let mut reader = DirectionalBytesReader::new(&blob, !packed);
            if !packed && num_bytes > 0 {
                reader.set_position(num_bytes - 1);
            }
            Some(output_factory.read_final_output(&mut reader)?)
        } else {
            None
        };

        let input_type = match data_in.read_byte()? {
            0 => InputType::Byte1,
            1 => InputType::Byte2,
            2 => InputType::Byte4,
            x => bail!(ErrorKind::IllegalState(format!(
                "Invalid input type: {}",
                x
            ),)),
        };

        let node_ref_to_address = if packed {
            Some(::packed::get_reader(data_in)?)
        } else {
            None
        };

        let start_node = data_in.read_vlong()? as CompiledAddress;
        let node_count = data_in.read_vlong()?;
        let arc_count = data_in.read_vlong()?;
        let arc_with_output_count = data_in.read_vlong()?;

        let num_bytes = data_in.read_vlong()?;
        let bytes_store: BytesStore;
        let mut bytes_array: Vec<u8>;
        let use_bytes_array: bool;

        if num_bytes > (1i64 << max_block_bits) {
            // FST is big: we need multiple pages
            bytes_store = BytesStore::from_input(data_in, num_bytes as usize)?;
            bytes_array = Vec::with_capacity(0);
            use_bytes_array = false;
        } else {
            let len = num_bytes as usize;
            bytes_array = vec![0u8; len];
            data_in.read_bytes(&mut bytes_array, 0, len)?;
            // a dummy struct
            bytes_store = BytesStore::with_block_bits(8);
            use_bytes_array = true;
        };

        let mut fst = FST {
            input_type,
            start_node,
            version,
            output_factory,
            bytes_store,
            use_bytes_array,
            empty_output,
            bytes_array,
            cached_root_arcs: Vec::with_capacity(0),
            loaded: true,
            packed,
            node_ref_to_address,
            node_address: None,
            in_counts: None,
            node_count,
            arc_count,
            arc_with_output_count,
        };
        fst.cache_root_arcs()?;
        debug!(
            "loaded fst: version {}, packed {}, {} nodes, {} arcs, {} bytes",
            version, fst.packed, fst.node_count, fst.arc_count, num_bytes
        );
        Ok(fst)
    }

    pub fn outputs(&self) -> &F {
        &self.output_factory
    }

    pub fn set_empty_output(&mut self, v: F::Value) {
        self.empty_output = Some(v);
    }

    pub fn get(&self, bytes: &[u8]) -> Result<Option<F::Value>> {
        let mut arc = self.root_arc();
        let mut output = self.output_factory.empty();
        let mut bytes_reader = self.bytes_reader();

        for label in LabelStream::new(bytes) {
            let next_arc = self.find_target_arc(label, &arc, &mut bytes_reader)?;
            match next_arc {
                Some(a) => {
                    arc = a;
                    if let Some(ref out) = arc.output {
                        if !out.is_empty() {
                            output = output.cat(out);
                        }
                    }
                }
                None => return Ok(None),
            }
        }

        if arc.is_final() {
            if let Some(ref out) = arc.next_final_output {
                if !out.is_empty() {
                    output = output.cat(out);
                }
            }
            Ok(Some(output))
        } else {
            Ok(None)
        }
    }

    pub fn bytes_reader(&self) -> FSTBytesReader {
        if self.use_bytes_array {
            FSTBytesReader::Directional(DirectionalBytesReader::new(
                &self.bytes_array,
                !self.packed,
            ))
        } else if self.packed {
            FSTBytesReader::Store(self.bytes_store.get_forward_reader())
        } else {
            FSTBytesReader::Store(self.bytes_store.get_reverse_reader())
        }
    }

    /// Ordinal to address while building toward a pack; identity otherwise.
    fn get_node_address(&self, node: CompiledAddress) -> CompiledAddress {
        match self.node_address {
            Some(ref na) => na.get(node as usize),
            None => node,
        }
    }

    pub fn root_arc(&self) -> Arc<F::Value> {
        let mut arc = Arc::empty();

        if let Some(ref default_output) = self.empty_output {
            arc.flags = BIT_FINAL_ARC | BIT_LAST_ARC;
            arc.next_final_output = Some(default_output.clone());
            if !default_output.is_empty() {
                arc.flags |= BIT_ARC_HAS_FINAL_OUTPUT;
            }
        } else {
            arc.flags = BIT_LAST_ARC;
            arc.next_final_output = Some(self.output_factory.empty());
        }
        arc.output = Some(self.output_factory.empty());

        // If there are no nodes, ie, the FST only accepts the
        // empty string, then startNode is 0.
        arc.target = self.start_node;

        arc
    }

    pub fn find_target_arc(
        &self,
        label: Label,
        incoming_arc: &Arc<F::Value>,
        bytes_reader: &mut dyn BytesReader,
    ) -> Result<Option<Arc<F::Value>>> {
        self.find_target_arc_with_cache(label, incoming_arc, bytes_reader, true)
    }

    pub fn find_target_arc_with_cache(
        &self,
        label: Label,
        incoming_arc: &Arc<F::Value>,
        bytes_reader: &mut dyn BytesReader,
        use_root_arc_cache: bool,
    ) -> Result<Option<Arc<F::Value>>> {
        if label == END_LABEL {
            if incoming_arc.is_final() {
                let mut target_arc = incoming_arc.clone();
                if !self.target_has_arc(incoming_arc.target) {
                    target_arc.flags = BIT_LAST_ARC;
                } else {
                    target_arc.flags = 0u8;
                    // next_arc is a node (not an address!) in this case:
                    target_arc.next_arc = Some(incoming_arc.target);
                }
                target_arc.output = incoming_arc.next_final_output.clone();
                target_arc.label = END_LABEL;
                return Ok(Some(target_arc));
            } else {
                return Ok(None);
            }
        }

        if use_root_arc_cache
            && !self.cached_root_arcs.is_empty()
            && incoming_arc.target == self.start_node
            && label < self.cached_root_arcs.len() as i32
        {
            let result = self.cached_root_arcs[label as usize].clone();
            debug_assert!(self.assert_root_cached_arc(label, &result)?);
            return Ok(result);
        }

        if !self.target_has_arc(incoming_arc.target) {
            return Ok(None);
        }

        bytes_reader.set_position(self.get_node_address(incoming_arc.target) as usize);

        let mut arc = Arc::empty();
        arc.from_node = incoming_arc.target;
        if bytes_reader.read_byte()? == ARCS_AS_FIXED_ARRAY {
            // Arcs are full array, do binary search.

            arc.num_arcs = bytes_reader.read_vint()? as usize;
            arc.bytes_per_arc = if self.packed || self.version >= VERSION_VINT_TARGET {
                bytes_reader.read_vint()? as usize
            } else {
                bytes_reader.read_int()? as usize
            };
            arc.arc_start_position = bytes_reader.position();
            let mut low = 0usize;
            let mut high = arc.num_arcs - 1;
            while low <= high {
                let mid = (low + high) >> 1;
                bytes_reader.set_position(arc.arc_start_position);
                bytes_reader.skip_bytes(arc.bytes_per_arc * mid + 1)?;
                let current_label = self.read_label(bytes_reader)?;
                let cmp = current_label - label;
                if cmp < 0 {
                    low = mid + 1;
                } else if cmp > 0 {
                    if mid == 0 {
                        break;
                    }
                    high = mid - 1;
                } else {
                    arc.arc_index = mid;
                    self.read_next_real_arc(&mut arc, bytes_reader)?;
                    return Ok(Some(arc));
                }
            }
            return Ok(None);
        }

        // Do linear scan
        let mut arc = self.read_first_real_arc(incoming_arc.target, bytes_reader)?;

        loop {
            if arc.label == label {
                return Ok(Some(arc));
            } else if arc.label > label || arc.is_last() {
                return Ok(None);
            } else {
                self.read_next_real_arc(&mut arc, bytes_reader)?;
            }
        }
    }

    // Called only from asserts, to validate that the
    // non-cached arc lookup would produce the same result, to
    // catch callers that illegally modify shared structures with
    // the result (we shallow-clone the Arc itself, but e.g. a BytesRef
    // output is still shared):
    fn assert_root_cached_arc(&self, label: Label, arc: &Option<Arc<F::Value>>) -> Result<bool> {
        let root = self.root_arc();
        let mut input = self.bytes_reader();
        let result = self.find_target_arc_with_cache(label, &root, &mut input, false)?;
        if let Some(ref res) = result {
            if let Some(arc) = arc {
                assert_eq!(res, arc);
            } else {
                panic!("cached root arc missing for label {}", label);
            }
        } else {
            debug_assert!(arc.is_none());
        }
        Ok(true)
    }

    fn target_has_arc(&self, target: CompiledAddress) -> bool {
        target > 0
    }

    fn read_label(&self, reader: &mut dyn BytesReader) -> Result<Label> {
        match self.input_type {
            InputType::Byte1 => reader.read_byte().map(Label::from),
            InputType::Byte2 => reader.read_short().map(Label::from),
            InputType::Byte4 => reader.read_vint(),
        }
    }

    pub fn read_first_real_arc(
        &self,
        node: CompiledAddress,
        bytes_reader: &mut dyn BytesReader,
    ) -> Result<Arc<F::Value>> {
        bytes_reader.set_position(self.get_node_address(node) as usize);

        let mut arc = Arc::empty();
        arc.from_node = node;
        if bytes_reader.read_byte()? == ARCS_AS_FIXED_ARRAY {
            arc.num_arcs = bytes_reader.read_vint()? as usize;
            arc.bytes_per_arc = if self.packed || self.version >= VERSION_VINT_TARGET {
                bytes_reader.read_vint()? as usize
            } else {
                bytes_reader.read_int()? as usize
            };
            arc.arc_start_position = bytes_reader.position();
            arc.arc_index = 0;
        } else {
            arc.next_arc = Some(self.get_node_address(node));
        }
        self.read_next_real_arc(&mut arc, bytes_reader)?;
        Ok(arc)
    }

    pub fn read_first_target_arc(
        &self,
        follow: &Arc<F::Value>,
        input: &mut dyn BytesReader,
    ) -> Result<Arc<F::Value>> {
        if follow.is_final() {
            let mut arc = Arc::empty();
            arc.flags = BIT_FINAL_ARC;
            arc.label = END_LABEL;
            arc.target = FINAL_END_NODE;
            arc.output = follow.next_final_output.clone();
            if !self.target_has_arc(follow.target) {
                arc.flags |= BIT_LAST_ARC;
            } else {
                arc.next_arc = Some(follow.target);
            };
            Ok(arc)
        } else {
            self.read_first_real_arc(follow.target, input)
        }
    }

    pub fn read_next_arc(
        &self,
        arc: &mut Arc<F::Value>,
        bytes_reader: &mut dyn BytesReader,
    ) -> Result<()> {
        if arc.label == END_LABEL {
            // This was a fake inserted "final" arc
            if arc.next_arc.unwrap_or(0) <= 0 {
                bail!(ErrorKind::IllegalArgument(
                    "cannot read_next_arc when arc.is_last()".into()
                ));
            }
            let next = arc.next_arc.unwrap();
            let new_arc = self.read_first_real_arc(next, bytes_reader)?;
            arc.copy_from(&new_arc);
        } else {
            self.read_next_real_arc(arc, bytes_reader)?;
        }
        Ok(())
    }

    pub fn read_next_real_arc(
        &self,
        arc: &mut Arc<F::Value>,
        bytes_reader: &mut dyn BytesReader,
    ) -> Result<()> {
        if arc.bytes_per_arc > 0 {
            debug_assert!(arc.arc_index < arc.num_arcs);
            bytes_reader.set_position(arc.arc_start_position);
            bytes_reader.skip_bytes(arc.arc_index * arc.bytes_per_arc)?;
            arc.arc_index += 1;
        } else {
            debug_assert!(arc.next_arc.is_some());
            bytes_reader.set_position(arc.next_arc.unwrap() as usize);
        }

        arc.flags = bytes_reader.read_byte()?;
        arc.label = self.read_label(bytes_reader)?;
        arc.output = if flag(arc.flags, BIT_ARC_HAS_OUTPUT) {
            Some(self.output_factory.read(bytes_reader)?)
        } else {
            None
        };
        arc.next_final_output = if flag(arc.flags, BIT_ARC_HAS_FINAL_OUTPUT) {
            Some(self.output_factory.read_final_output(bytes_reader)?)
        } else {
            None
        };
        if flag(arc.flags, BIT_STOP_NODE) {
            arc.target = if flag(arc.flags, BIT_FINAL_ARC) {
                FINAL_END_NODE
            } else {
                NON_FINAL_END_NODE
            };
            arc.next_arc = Some(bytes_reader.position() as i64);
        } else if flag(arc.flags, BIT_TARGET_NEXT) {
            arc.next_arc = Some(bytes_reader.position() as i64);
            if self.node_address.is_none() {
                if !flag(arc.flags, BIT_LAST_ARC) {
                    if arc.bytes_per_arc > 0 {
                        bytes_reader.set_position(arc.arc_start_position);
                        bytes_reader.skip_bytes(arc.bytes_per_arc * arc.num_arcs)?;
                    } else {
                        self.seek_to_next_node(bytes_reader)?;
                    }
                }
                arc.target = bytes_reader.position() as CompiledAddress;
            } else {
                // ordinal space: the next node is the one frozen just
                // before this one
                arc.target = arc.from_node - 1;
                debug_assert!(arc.target > 0);
            }
        } else {
            if self.packed {
                let pos = bytes_reader.position() as i64;
                let code = bytes_reader.read_vlong()?;
                if flag(arc.flags, BIT_TARGET_DELTA) {
                    arc.target = pos + code;
                } else {
                    let table = self.node_ref_to_address.as_ref().ok_or_else(|| {
                        ErrorKind::IllegalState("packed automaton without node table".into())
                    })?;
                    if (code as usize) < table.size() {
                        // index into the deref table
                        arc.target = table.get(code as usize);
                    } else {
                        arc.target = code;
                    }
                }
            } else {
                arc.target = self.read_unpacked_node(bytes_reader)?;
            }
            arc.next_arc = Some(bytes_reader.position() as i64);
        }
        Ok(())
    }

    fn seek_to_next_node(&self, bytes_reader: &mut dyn BytesReader) -> Result<()> {
        loop {
            let flags = bytes_reader.read_byte()?;
            self.read_label(bytes_reader)?;

            if flag(flags, BIT_ARC_HAS_OUTPUT) {
                self.output_factory.skip_output(bytes_reader)?;
            }
            if flag(flags, BIT_ARC_HAS_FINAL_OUTPUT) {
                self.output_factory.skip_final_output(bytes_reader)?;
            }
            if !flag(flags, BIT_STOP_NODE) && !flag(flags, BIT_TARGET_NEXT) {
                if self.packed {
                    bytes_reader.read_vlong()?;
                } else {
                    self.read_unpacked_node(bytes_reader)?;
                }
            }

            if flag(flags, BIT_LAST_ARC) {
                return Ok(());
            }
        }
    }

    fn read_unpacked_node(&self, bytes_reader: &mut dyn BytesReader) -> Result<CompiledAddress> {
        if self.version < VERSION_VINT_TARGET {
            bytes_reader.read_int().map(|x| CompiledAddress::from(x))
        } else {
            bytes_reader.read_vlong()
        }
    }

    // implements for build

    /// Serializes a frozen frontier node by appending its bytes to the end
    /// of the current image. Returns the node's address, or its ordinal
    /// when building toward a pack.
    pub fn add_node(
        &mut self,
        node_in: &UnCompiledNode<F>,
        last_frozen_node: CompiledAddress,
        reused_bytes_per_arc: &mut Vec<usize>,
        allow_array_arcs: bool,
    ) -> Result<CompiledAddress> {
        let no_output = self.output_factory.empty();

        if node_in.num_arcs == 0 {
            return Ok(if node_in.is_final {
                FINAL_END_NODE
            } else {
                NON_FINAL_END_NODE
            });
        }
        let start_address = self.bytes_store.get_position();

        let do_fixed_array = self.should_expand(node_in, allow_array_arcs);
        if do_fixed_array && reused_bytes_per_arc.len() < node_in.num_arcs {
            reused_bytes_per_arc.resize(node_in.num_arcs, 0);
        }
        self.arc_count += node_in.num_arcs as i64;

        let last_arc = node_in.num_arcs - 1;
        let mut last_arc_start = self.bytes_store.get_position();
        let mut max_bytes_per_arc = 0;
        for idx in 0..node_in.num_arcs {
            let arc = &node_in.arcs[idx];

            let target = match arc.target {
                Node::Compiled(c) => c,
                Node::UnCompiled(_) => unreachable!(),
            };
            let mut flags = 0;
            if idx == last_arc {
                flags += BIT_LAST_ARC;
            }
            if last_frozen_node == target && !do_fixed_array {
                // TODO: for better perf(but more RAM used) we could avoid this except when
                // arc is "near" the last arc:
                flags += BIT_TARGET_NEXT;
            }

            if arc.is_final {
                flags += BIT_FINAL_ARC;
                if arc.next_final_output != no_output {
                    flags += BIT_ARC_HAS_FINAL_OUTPUT;
                }
            } else {
                debug_assert_eq!(arc.next_final_output, no_output);
            }

            let target_has_arcs = target > 0;
            if !target_has_arcs {
                flags += BIT_STOP_NODE;
            } else if let Some(ref mut in_counts) = self.in_counts {
                let count = in_counts.get(target as usize);
                in_counts.set(target as usize, count + 1);
            }

            if arc.output != no_output {
                flags += BIT_ARC_HAS_OUTPUT;
            }

            self.bytes_store.write_byte(flags)?;
            self.write_label_local(arc.label)?;

            if arc.output != no_output {
                self.output_factory
                    .write(&arc.output, &mut self.bytes_store)?;
                self.arc_with_output_count += 1;
            }

            if arc.next_final_output != no_output {
                self.output_factory
                    .write_final_output(&arc.next_final_output, &mut self.bytes_store)?;
            }

            if target_has_arcs && (flags & BIT_TARGET_NEXT) == 0 {
                debug_assert!(target > 0);
                // an ordinal when building toward a pack, a real address
                // otherwise
                self.bytes_store.write_vlong(target)?;
            }

            // just write the arcs "like normal" on first pass,
            // but record how many bytes each one took, and max
            // byte size:
            if do_fixed_array {
                let length = self.bytes_store.get_position() - last_arc_start;
                reused_bytes_per_arc[idx] = length;
                last_arc_start = self.bytes_store.get_position();
                max_bytes_per_arc = max(max_bytes_per_arc, length);
            }
        }

        if do_fixed_array {
            let max_header_size = 11; // header(byte) + numArcs(vint) + numBytes(vint)
            debug_assert!(max_bytes_per_arc > 0);
            // 2nd pass just "expands" all arcs to take up a fixed
            // byte size

            let mut header = vec![0u8; max_header_size];
            let fixed_array_start: usize;
            let header_len: usize;
            {
                let mut bad = ByteArrayDataOutput::new(&mut header);
                // write a "false" first arc
                bad.write_byte(ARCS_AS_FIXED_ARRAY)?;
                bad.write_vint(node_in.num_arcs as i32)?;
                bad.write_vint(max_bytes_per_arc as i32)?;
                header_len = bad.pos;
                fixed_array_start = start_address + header_len;
            }

            // expand the arcs in place, backwards
            let mut src_pos = self.bytes_store.get_position();
            let mut dest_pos = fixed_array_start + node_in.num_arcs * max_bytes_per_arc;
            debug_assert!(dest_pos >= src_pos);
            if dest_pos > src_pos {
                self.bytes_store.skip_bytes(dest_pos - src_pos);
                for i in 0..node_in.num_arcs {
                    let arc_idx = node_in.num_arcs - 1 - i;
                    dest_pos -= max_bytes_per_arc;
                    src_pos -= reused_bytes_per_arc[arc_idx];
                    if src_pos != dest_pos {
                        debug_assert!(dest_pos > src_pos);
                        self.bytes_store.copy_bytes_local(
                            src_pos,
                            dest_pos,
                            reused_bytes_per_arc[arc_idx],
                        );
                    }
                }
            }

            // now write the header
            self.bytes_store
                .write_bytes_local(start_address, &header, 0, header_len);
        }

        let this_node_address = (self.bytes_store.get_position() - 1) as CompiledAddress;
        self.bytes_store
            .reverse(start_address, this_node_address as usize);

        self.node_count += 1;
        let node = if self.node_address.is_some() {
            // nodes are addressed by 1 + ordinal
            let ordinal = self.node_count;
            {
                let node_address = self.node_address.as_mut().unwrap();
                if ordinal as usize == node_address.size() {
                    let new_size = node_address.size() + (node_address.size() >> 1).max(8);
                    node_address.resize(new_size);
                }
                node_address.set(ordinal as usize, this_node_address);
            }
            {
                let in_counts = self.in_counts.as_mut().unwrap();
                if ordinal as usize == in_counts.size() {
                    let new_size = in_counts.size() + (in_counts.size() >> 1).max(8);
                    in_counts.resize(new_size);
                }
            }
            ordinal
        } else {
            this_node_address
        };
        Ok(node)
    }

    pub fn write_label(&self, out: &mut dyn DataOutput, v: Label) -> Result<()> {
        debug_assert!(v >= 0);
        match self.input_type {
            InputType::Byte1 => {
                debug_assert!(v <= 255);
                out.write_byte(v as u8)
            }
            InputType::Byte2 => {
                debug_assert!(v <= 65535);
                out.write_short(v as i16)
            }
            InputType::Byte4 => out.write_vint(v),
        }
    }

    fn write_label_local(&mut self, v: Label) -> Result<()> {
        debug_assert!(v >= 0);
        match self.input_type {
            InputType::Byte1 => {
                debug_assert!(v <= 255);
                self.bytes_store.write_byte(v as u8)
            }
            InputType::Byte2 => {
                debug_assert!(v <= 65535);
                self.bytes_store.write_short(v as i16)
            }
            InputType::Byte4 => self.bytes_store.write_vint(v),
        }
    }

    /// Nodes will be expanded if their depth (distance from the root node) is
    /// <= this value and their number of arcs is >=
    /// `FIXED_ARRAY_NUM_ARCS_SHALLOW`.
    ///
    /// Fixed array consumes more RAM but enables binary search on the arcs
    /// (instead of a linear scan) on lookup by arc label.
    fn should_expand(&self, node: &UnCompiledNode<F>, allow_array_arcs: bool) -> bool {
        allow_array_arcs
            && ((node.depth <= FIXED_ARRAY_SHALLOW_DISTANCE
                && node.num_arcs >= FIXED_ARRAY_NUM_ARCS_SHALLOW)
                || node.num_arcs >= FIXED_ARRAY_NUM_ARCS_DEEP)
    }

    pub fn finish(&mut self, new_start_node: CompiledAddress) -> Result<()> {
        if self.start_node != -1 {
            bail!(ErrorKind::IllegalState("already finished".into()));
        }
        let new_start_node = if new_start_node == FINAL_END_NODE && self.empty_output.is_some() {
            0
        } else {
            new_start_node
        };
        self.start_node = new_start_node;
        self.bytes_store.finish();
        self.cache_root_arcs()
    }

    // optionally caches the first 128 root labels
    pub fn cache_root_arcs(&mut self) -> Result<()> {
        let root = self.root_arc();
        if self.target_has_arc(root.target) {
            let mut count = 0;
            let mut arcs = vec![None; 128];
            {
                let mut input = self.bytes_reader();
                let mut arc = self.read_first_real_arc(root.target, &mut input)?;

                loop {
                    debug_assert_ne!(arc.label, END_LABEL);
                    let is_last = arc.is_last();
                    if arc.label < arcs.len() as i32 {
                        let idx = arc.label as usize;
                        let mut new_arc = Arc::empty();
                        new_arc.copy_from(&arc);
                        arcs[idx] = Some(new_arc);
                        count += 1;
                    } else {
                        break;
                    }
                    if is_last {
                        break;
                    }
                    self.read_next_real_arc(&mut arc, &mut input)?;
                }
            }

            if count >= FIXED_ARRAY_NUM_ARCS_SHALLOW {
                self.cached_root_arcs = arcs;
                #[cfg(debug_assertions)]
                {
                    for label in 0..self.cached_root_arcs.len() as Label {
                        let cached = self.cached_root_arcs[label as usize].clone();
                        self.assert_root_cached_arc(label, &cached)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn save<O: DataOutput + ?Sized>(&self, out: &mut O) -> Result<()> {
        if self.start_node == -1 {
            bail!(ErrorKind::IllegalState("call finish first!".into()));
        }
        if self.node_address.is_some() {
            bail!(ErrorKind::IllegalState(
                "cannot save an FST pre-packed FST; it must first be packed".into()
            ));
        }
        if self.packed && self.loaded {
            bail!(ErrorKind::UnsupportedOperation(
                "cannot save a packed FST that was loaded from disk".into()
            ));
        }
        write_header(out, FILE_FORMAT_NAME, VERSION_CURRENT)?;
        out.write_byte(if self.packed { 1 } else { 0 })?;

        // TODO: really we should encode this as an arc, arriving
        // to the root node, instead of special casing here:
        if let Some(ref empty_output) = self.empty_output {
            // Accepts empty string
            out.write_byte(1)?;

            // Serialize empty-string output
            let mut empty_output_bytes: Vec<u8> = Vec::new();
            self.output_factory
                .write_final_output(empty_output, &mut empty_output_bytes)?;

            if !self.packed {
                // reverse, the way node bytes are
                empty_output_bytes.reverse();
            }
            out.write_vint(empty_output_bytes.len() as i32)?;
            out.write_bytes(&empty_output_bytes, 0, empty_output_bytes.len())?;
        } else {
            out.write_byte(0)?;
        }
        let t = match self.input_type {
            InputType::Byte1 => 0,
            InputType::Byte2 => 1,
            InputType::Byte4 => 2,
        };
        out.write_byte(t)?;
        if self.packed {
            match self.node_ref_to_address {
                Some(ref table) => table.save(out)?,
                None => bail!(ErrorKind::IllegalState(
                    "packed automaton without node table".into()
                )),
            }
        }
        out.write_vlong(self.start_node)?;
        out.write_vlong(self.node_count)?;
        out.write_vlong(self.arc_count)?;
        out.write_vlong(self.arc_with_output_count)?;
        if self.use_bytes_array {
            out.write_vlong(self.bytes_array.len() as i64)?;
            out.write_bytes(&self.bytes_array, 0, self.bytes_array.len())?;
        } else {
            let num_bytes = self.bytes_store.get_position();
            out.write_vlong(num_bytes as i64)?;
            self.bytes_store.write_to(out)?;
        }
        Ok(())
    }
}

pub enum FSTBytesReader<'a> {
    Directional(DirectionalBytesReader<'a>),
    Store(StoreBytesReader<'a>),
}

impl<'a> BytesReader for FSTBytesReader<'a> {
    fn position(&self) -> usize {
        match *self {
            FSTBytesReader::Directional(ref d) => d.position(),
            FSTBytesReader::Store(ref b) => b.position(),
        }
    }

    fn set_position(&mut self, pos: usize) {
        match *self {
            FSTBytesReader::Directional(ref mut d) => d.set_position(pos),
            FSTBytesReader::Store(ref mut b) => b.set_position(pos),
        }
    }

    fn reversed(&self) -> bool {
        match *self {
            FSTBytesReader::Directional(ref d) => d.reversed(),
            FSTBytesReader::Store(ref b) => b.reversed(),
        }
    }
}

impl<'a> io::Read for FSTBytesReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            FSTBytesReader::Directional(ref mut d) => d.read(buf),
            FSTBytesReader::Store(ref mut b) => b.read(buf),
        }
    }
}

impl<'a> DataInput for FSTBytesReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        match *self {
            FSTBytesReader::Directional(ref mut d) => d.read_byte(),
            FSTBytesReader::Store(ref mut b) => b.read_byte(),
        }
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, length: usize) -> Result<()> {
        match *self {
            FSTBytesReader::Directional(ref mut d) => d.read_bytes(b, offset, length),
            FSTBytesReader::Store(ref mut r) => r.read_bytes(b, offset, length),
        }
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        match *self {
            FSTBytesReader::Directional(ref mut d) => d.skip_bytes(count),
            FSTBytesReader::Store(ref mut b) => b.skip_bytes(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder::FstBuilder;
    use io::ByteArrayDataInput;
    use outputs::{ByteSequenceOutput, ByteSequenceOutputFactory, PositiveIntOutput,
                  PositiveIntOutputFactory};

    fn build_byte_fst(
        entries: &[(&str, Vec<u8>)],
    ) -> FST<ByteSequenceOutputFactory> {
        let mut builder = FstBuilder::new(InputType::Byte1, ByteSequenceOutputFactory::new());
        builder.init();
        for (input, output) in entries {
            let labels: Vec<Label> = input.bytes().map(Label::from).collect();
            builder
                .add(&labels, ByteSequenceOutput::new(output.clone()))
                .unwrap();
        }
        builder.finish().unwrap().unwrap()
    }

    #[test]
    fn test_fst() {
        let input_values = vec!["cat", "dag", "dbg", "dcg", "ddg", "deg", "dog", "dogs"];
        let output_values = vec![5u8, 7, 12, 13, 14, 15, 16, 17];

        let entries: Vec<(&str, Vec<u8>)> = input_values
            .iter()
            .zip(output_values.iter())
            .map(|(i, o)| (*i, vec![*o]))
            .collect();
        let fst = build_byte_fst(&entries);

        for i in 0..input_values.len() {
            let res = fst.get(input_values[i].as_bytes()).unwrap();
            assert_eq!(
                res,
                Some(ByteSequenceOutput::new(vec![output_values[i]])),
                "lookup of {}",
                input_values[i]
            );
        }
        assert_eq!(fst.get(b"ca").unwrap(), None);
        assert_eq!(fst.get(b"dig").unwrap(), None);
        assert_eq!(fst.get(b"dogss").unwrap(), None);
    }

    #[test]
    fn test_shared_prefix_outputs() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        for (input, v) in &[("car", 2i64), ("cat", 1), ("dog", 3)] {
            let labels: Vec<Label> = input.bytes().map(Label::from).collect();
            builder.add(&labels, PositiveIntOutput::new(*v)).unwrap();
        }
        let fst = builder.finish().unwrap().unwrap();

        assert_eq!(fst.get(b"car").unwrap().map(|o| o.value()), Some(2));
        assert_eq!(fst.get(b"cat").unwrap().map(|o| o.value()), Some(1));
        assert_eq!(fst.get(b"dog").unwrap().map(|o| o.value()), Some(3));
        // prefixes of accepted keys are not accepted themselves
        assert_eq!(fst.get(b"ca").unwrap(), None);
        assert_eq!(fst.get(b"").unwrap(), None);
    }

    #[test]
    fn test_empty_input_accepted() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&[], PositiveIntOutput::new(17)).unwrap();
        let labels: Vec<Label> = b"a".iter().map(|b| Label::from(*b)).collect();
        builder.add(&labels, PositiveIntOutput::new(5)).unwrap();
        let fst = builder.finish().unwrap().unwrap();

        assert_eq!(fst.get(b"").unwrap().map(|o| o.value()), Some(17));
        assert_eq!(fst.get(b"a").unwrap().map(|o| o.value()), Some(5));
    }

    #[test]
    fn test_only_empty_key() {
        // start node is immediately final with no outgoing arcs
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&[], PositiveIntOutput::new(42)).unwrap();
        let fst = builder.finish().unwrap().unwrap();

        assert_eq!(fst.start_node, 0);
        assert_eq!(fst.empty_output.as_ref().map(|o| o.value()), Some(42));
        assert_eq!(fst.get(b"").unwrap().map(|o| o.value()), Some(42));
        assert_eq!(fst.get(b"a").unwrap(), None);

        let mut blob: Vec<u8> = Vec::new();
        fst.save(&mut blob).unwrap();
        let mut input = ByteArrayDataInput::new(&blob[..]);
        let loaded = FST::from_input(&mut input, PositiveIntOutputFactory::new()).unwrap();
        assert_eq!(loaded.get(b"").unwrap().map(|o| o.value()), Some(42));
        assert_eq!(loaded.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_save_load_round_trip() {
        let input_values = vec!["cat", "dag", "dbg", "dcg", "ddg", "deg", "dog", "dogs"];
        let entries: Vec<(&str, Vec<u8>)> = input_values
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, vec![i as u8 + 1]))
            .collect();
        let fst = build_byte_fst(&entries);

        let mut blob: Vec<u8> = Vec::new();
        fst.save(&mut blob).unwrap();

        let mut input = ByteArrayDataInput::new(&blob[..]);
        let loaded = FST::from_input(&mut input, ByteSequenceOutputFactory::new()).unwrap();
        for (i, s) in input_values.iter().enumerate() {
            assert_eq!(
                loaded.get(s.as_bytes()).unwrap(),
                Some(ByteSequenceOutput::new(vec![i as u8 + 1]))
            );
        }
        assert_eq!(loaded.get(b"cab").unwrap(), None);
    }

    #[test]
    fn test_fixed_array_node_lookup() {
        // root fans out to > 10 labels so it gets the fixed-array encoding
        let inputs: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        for (i, input) in inputs.iter().enumerate() {
            let labels: Vec<Label> = input.bytes().map(Label::from).collect();
            builder
                .add(&labels, PositiveIntOutput::new(i as i64 + 1))
                .unwrap();
        }
        let fst = builder.finish().unwrap().unwrap();

        for (i, input) in inputs.iter().enumerate() {
            assert_eq!(
                fst.get(input.as_bytes()).unwrap().map(|o| o.value()),
                Some(i as i64 + 1)
            );
        }
        assert_eq!(fst.get(b"A").unwrap(), None);
    }

    #[test]
    fn test_arc_iteration_sorted() {
        let fst = build_byte_fst(&[
            ("dag", vec![1]),
            ("dbg", vec![2]),
            ("dcg", vec![3]),
            ("ddg", vec![4]),
            ("deg", vec![5]),
            ("dfg", vec![6]),
        ]);
        let mut reader = fst.bytes_reader();
        let root = fst.root_arc();
        let first = fst
            .find_target_arc(Label::from(b'd'), &root, &mut reader)
            .unwrap()
            .unwrap();

        let mut arc = fst.read_first_real_arc(first.target, &mut reader).unwrap();
        let mut labels = vec![arc.label];
        while !arc.is_last() {
            fst.read_next_real_arc(&mut arc, &mut reader).unwrap();
            labels.push(arc.label);
        }
        let expected: Vec<Label> = (b'a'..=b'f').map(Label::from).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_save_before_finish_fails() {
        let fst: FST<ByteSequenceOutputFactory> =
            FST::new(InputType::Byte1, ByteSequenceOutputFactory::new(), 15);
        let mut out: Vec<u8> = Vec::new();
        assert!(fst.save(&mut out).is_err());
    }
}
