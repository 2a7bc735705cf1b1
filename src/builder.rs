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

//! Builds a minimal FST (maps a label sequence to an arbitrary output)
//! from pre-sorted terms with outputs. The automaton is written
//! on-the-fly into a compact serialized byte array, which can be saved /
//! loaded or used directly for traversal. The FST is always finite (no
//! cycles).
//!
//! The algorithm is described at
//! http://citeseerx.ist.psu.edu/viewdoc/summary?doi=10.1.1.24.3698

use std::cmp::{max, min};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;

use error::ErrorKind::IllegalArgument;
use error::Result;
use fst::{CompiledAddress, InputType, Label, FST};
use io::BytesReader;
use outputs::{Output, OutputFactory};
use packed::{bits_required, GrowableWriter, COMPACT};

pub struct FstBuilder<F: OutputFactory> {
    dedup_hash: Option<NodeHash>,
    pub fst: FST<F>,
    no_output: F::Value,
    // simplistic pruning: we prune node (and all following
    // nodes) if less than this number of terms go through it:
    min_suffix_count1: u32,
    // better pruning: we prune node (and all following
    // nodes) if the prior node has less than this number of
    // terms go through it:
    min_suffix_count2: u32,
    do_share_non_singleton_nodes: bool,
    share_max_tail_length: u32,
    last_input: Vec<Label>,
    // current "frontier"
    pub frontier: Vec<UnCompiledNode<F>>,
    // Used for the BIT_TARGET_NEXT optimization (whereby
    // instead of storing the address of the target node for
    // a given arc, we mark a single bit noting that the next
    // node in the bytes is the target node):
    pub last_frozen_node: CompiledAddress,
    // Reused temporarily while building the FST:
    pub reused_bytes_per_arc: Vec<usize>,
    pub allow_array_arcs: bool,
    do_share_suffix: bool,
    will_pack: bool,
    acceptable_overhead_ratio: f32,
    inited: bool,
}

impl<F: OutputFactory> FstBuilder<F> {
    pub fn new(input_type: InputType, outputs: F) -> Self {
        Self::build(
            input_type,
            0,
            0,
            true,
            true,
            u32::max_value(),
            outputs,
            false,
            COMPACT,
            true,
            15,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        input_type: InputType,
        min_suffix_count1: u32,
        min_suffix_count2: u32,
        do_share_suffix: bool,
        do_share_non_singleton_nodes: bool,
        share_max_tail_length: u32,
        outputs: F,
        will_pack: bool,
        acceptable_overhead_ratio: f32,
        allow_array_arcs: bool,
        bytes_page_bits: u32,
    ) -> Self {
        let no_output = outputs.empty();
        let fst = FST::new_packable(
            input_type,
            outputs,
            will_pack,
            acceptable_overhead_ratio,
            bytes_page_bits as usize,
        );

        FstBuilder {
            dedup_hash: None,
            fst,
            no_output,
            min_suffix_count1,
            min_suffix_count2,
            do_share_non_singleton_nodes,
            share_max_tail_length,
            last_input: Vec::new(),
            frontier: Vec::with_capacity(10),
            last_frozen_node: 0,
            reused_bytes_per_arc: Vec::with_capacity(4),
            allow_array_arcs,
            do_share_suffix,
            will_pack,
            acceptable_overhead_ratio,
            inited: false,
        }
    }

    // this should be called right after new
    pub fn init(&mut self) {
        if self.do_share_suffix {
            self.dedup_hash = Some(NodeHash::new());
        }
        for i in 0..10 {
            let node = UnCompiledNode::new(self.fst.outputs().clone(), i);
            self.frontier.push(node);
        }
        self.inited = true;
    }

    pub fn term_count(&self) -> i64 {
        self.frontier[0].input_count
    }

    fn compile_node(&mut self, node_index: usize, tail_length: u32) -> Result<CompiledAddress> {
        debug_assert!(self.inited);
        let bytes_pos_start = self.fst.bytes_store.get_position();
        let do_share = self.do_share_non_singleton_nodes || self.frontier[node_index].num_arcs <= 1;
        let share_max_tail_length = self.share_max_tail_length;
        let last_frozen_node = self.last_frozen_node;
        let allow_array_arcs = self.allow_array_arcs;

        let node = {
            let FstBuilder {
                ref mut fst,
                ref mut dedup_hash,
                ref frontier,
                ref mut reused_bytes_per_arc,
                ..
            } = *self;
            let node_in = &frontier[node_index];
            match *dedup_hash {
                Some(ref mut dedup_hash)
                    if do_share && tail_length <= share_max_tail_length
                        && node_in.num_arcs > 0 =>
                {
                    dedup_hash.add(
                        fst,
                        node_in,
                        last_frozen_node,
                        reused_bytes_per_arc,
                        allow_array_arcs,
                    )?
                }
                _ => fst.add_node(
                    node_in,
                    last_frozen_node,
                    reused_bytes_per_arc,
                    allow_array_arcs,
                )?,
            }
        };

        let bytes_pos_end = self.fst.bytes_store.get_position();
        if bytes_pos_end != bytes_pos_start {
            // fst added a new node
            debug_assert!(bytes_pos_end > bytes_pos_start);
            self.last_frozen_node = node;
        }

        self.frontier[node_index].clear();

        Ok(node)
    }

    fn freeze_tail(&mut self, prefix_len_plus1: usize) -> Result<()> {
        debug_assert!(self.inited);
        let down_to = max(1, prefix_len_plus1);
        if self.last_input.len() < down_to {
            return Ok(());
        }
        for i in 0..=self.last_input.len() - down_to {
            let idx = self.last_input.len() - i;
            let mut do_prune = false;
            let do_compile;

            let tmp = UnCompiledNode::new(self.fst.outputs().clone(), 0);
            let mut parent = mem::replace(&mut self.frontier[idx - 1], tmp);

            if self.frontier[idx].input_count < i64::from(self.min_suffix_count1) {
                do_prune = true;
                do_compile = true;
            } else if idx > prefix_len_plus1 {
                // prune if parent's input_count is less than min_suffix_count2
                if parent.input_count < i64::from(self.min_suffix_count2)
                    || (self.min_suffix_count2 == 1 && parent.input_count == 1 && idx > 1)
                {
                    // my parent, about to be compiled, doesn't make the cut, so
                    // I'm definitely pruned

                    // if minSuffixCount2 is 1, we keep only up
                    // until the 'distinguished edge', ie we keep only the
                    // 'divergent' part of the FST. if my parent, about to be
                    // compiled, has inputCount 1 then we are already past the
                    // distinguished edge.  NOTE: this only works if
                    // the FST outputs are not "compressible" (simple
                    // ords ARE compressible).
                    do_prune = true;
                }
                do_compile = true;
            } else {
                // if pruning is disabled (count is 0) we can always
                // compile current node
                do_compile = self.min_suffix_count2 == 0;
            }

            if self.frontier[idx].input_count < i64::from(self.min_suffix_count2)
                || (self.min_suffix_count2 == 1 && self.frontier[idx].input_count == 1 && idx > 1)
            {
                // drop all arcs
                for arc_idx in 0..self.frontier[idx].num_arcs {
                    if let Node::UnCompiled(target) = self.frontier[idx].arcs[arc_idx].target {
                        self.frontier[target].clear();
                    }
                }
                self.frontier[idx].num_arcs = 0;
            }

            if do_prune {
                // this node doesn't make it -- deref it
                self.frontier[idx].clear();
                parent.delete_last(self.last_input[idx - 1]);
            } else {
                if self.min_suffix_count2 != 0 {
                    let tail_len = self.last_input.len() - idx;
                    self.compile_all_targets(idx, tail_len)?;
                }

                let next_final_output = self.frontier[idx].output.clone();
                // We "fake" the node as being final if it has no
                // outgoing arcs; in theory we could leave it
                // as non-final (the FST can represent this), but
                // downstream traversal code has trouble w/ non-final
                // dead-end states:
                let is_final = self.frontier[idx].is_final || self.frontier[idx].num_arcs == 0;

                if do_compile {
                    // this node makes it and we now compile it.  first,
                    // compile any targets that were previously
                    // undecided:
                    let tail_len = (1 + self.last_input.len() - idx) as u32;
                    let n = self.compile_node(idx, tail_len)?;
                    parent.replace_last(
                        self.last_input[idx - 1],
                        Node::Compiled(n),
                        next_final_output,
                        is_final,
                    );
                } else {
                    // replace_last just to install
                    // next_final_output/is_final onto the arc
                    parent.replace_last(
                        self.last_input[idx - 1],
                        Node::UnCompiled(0), // a stub node
                        next_final_output,
                        is_final,
                    );
                    // this node will stay in play for now, since we are
                    // undecided on whether to prune it.  later, it
                    // will be either compiled or pruned, so we must
                    // allocate a new node:
                    self.frontier[idx] =
                        UnCompiledNode::new(self.fst.outputs().clone(), idx as i32);
                }
            }
            self.frontier[idx - 1] = parent;
        }

        Ok(())
    }

    /// Add the next input/output pair. The provided input must sort
    /// strictly after the previous one; out-of-order or duplicate inputs
    /// are rejected. The input is fully consumed when this returns, so
    /// the caller is free to reuse the slice.
    pub fn add(&mut self, input: &[Label], output: F::Value) -> Result<()> {
        debug_assert!(self.inited);
        if self.frontier[0].input_count > 0 && input <= &self.last_input[..] {
            bail!(IllegalArgument(format!(
                "inputs are added out of order: {:?} after {:?}",
                input, self.last_input
            )));
        }
        let mut output = output;

        if self.frontier.len() < input.len() + 1 {
            for i in self.frontier.len()..input.len() + 2 {
                let node = UnCompiledNode::new(self.fst.outputs().clone(), i as i32);
                self.frontier.push(node);
            }
        }

        if input.is_empty() {
            // empty input: only allowed as first input.  we have
            // to special case this because the packed FST
            // format cannot represent the empty input since
            // 'finalness' is stored on the incoming arc, not on
            // the node
            self.frontier[0].input_count += 1;
            self.frontier[0].is_final = true;
            self.fst.set_empty_output(output);
            return Ok(());
        }

        // compare shared prefix length
        let mut pos1 = 0;
        let pos1_stop = min(self.last_input.len(), input.len());
        loop {
            self.frontier[pos1].input_count += 1;
            if pos1 >= pos1_stop || self.last_input[pos1] != input[pos1] {
                break;
            }
            pos1 += 1;
        }
        let prefix_len_plus1 = pos1 + 1;

        // minimize/compile states from previous input's
        // orphan'd suffix
        self.freeze_tail(prefix_len_plus1)?;

        // init tail states for current input
        for i in prefix_len_plus1..=input.len() {
            self.frontier[i - 1].add_arc(input[i - 1], Node::UnCompiled(i));
            self.frontier[i].input_count += 1;
        }

        let last_idx = input.len();
        self.frontier[last_idx].is_final = true;
        self.frontier[last_idx].output = self.no_output.clone();

        // push conflicting outputs forward, only as far as needed
        for i in 1..prefix_len_plus1 {
            let last_output = self.frontier[i - 1].get_last_output(input[i - 1]).clone();

            let common_output_prefix: F::Value;
            if last_output != self.no_output {
                common_output_prefix = self.fst.outputs().common(&output, &last_output);
                let word_suffix = self
                    .fst
                    .outputs()
                    .subtract(&last_output, &common_output_prefix);
                self.frontier[i].prepend_output(&word_suffix);
            } else {
                common_output_prefix = self.no_output.clone();
            }
            output = self.fst.outputs().subtract(&output, &common_output_prefix);
            if last_output != self.no_output {
                self.frontier[i - 1].set_last_output(input[i - 1], common_output_prefix);
            }
        }

        // this new arc is private to this new input; set its
        // arc output to the leftover output:
        self.frontier[prefix_len_plus1 - 1].set_last_output(input[prefix_len_plus1 - 1], output);

        // save last input
        self.last_input.clear();
        self.last_input.extend_from_slice(input);

        Ok(())
    }

    /// Returns the final FST. NOTE: this returns None if nothing is
    /// accepted by the automaton.
    pub fn finish(&mut self) -> Result<Option<FST<F>>> {
        debug_assert!(self.inited);
        // minimize nodes in the last word's suffix
        self.freeze_tail(0)?;

        if self.frontier[0].input_count < i64::from(self.min_suffix_count1)
            || self.frontier[0].input_count < i64::from(self.min_suffix_count2)
            || self.frontier[0].num_arcs == 0
        {
            if self.fst.empty_output.is_none()
                || (self.min_suffix_count1 > 0 || self.min_suffix_count2 > 0)
            {
                return Ok(None);
            }
        } else if self.min_suffix_count2 != 0 {
            let tail_len = self.last_input.len();
            self.compile_all_targets(0, tail_len)?;
        }

        let node = {
            let tail_len = self.last_input.len() as u32;
            self.compile_node(0, tail_len)?
        };
        self.fst.finish(node)?;

        // create a tmp for mem::replace
        let tmp_fst = FST::new(self.fst.input_type, self.fst.outputs().clone(), 1);
        let mut fst = mem::replace(&mut self.fst, tmp_fst);
        debug!(
            "built fst: {} terms, {} nodes, {} arcs",
            self.frontier[0].input_count,
            fst.node_count,
            fst.arc_count
        );

        if self.will_pack {
            let max_deref_nodes = max(10, (fst.node_count / 4) as usize);
            let packed = fst.pack(3, max_deref_nodes, self.acceptable_overhead_ratio)?;
            return Ok(Some(packed));
        }

        Ok(Some(fst))
    }

    fn compile_all_targets(&mut self, node_idx: usize, tail_length: usize) -> Result<()> {
        for i in 0..self.frontier[node_idx].num_arcs {
            if let Node::UnCompiled(index) = self.frontier[node_idx].arcs[i].target {
                // not yet compiled
                if self.frontier[index].num_arcs == 0 {
                    self.frontier[node_idx].arcs[i].is_final = true;
                    self.frontier[index].is_final = true;
                }
                self.frontier[node_idx].arcs[i].target =
                    Node::Compiled(self.compile_node(index, tail_length as u32 - 1)?);
            }
        }

        Ok(())
    }
}

pub struct BuilderArc<F: OutputFactory> {
    pub label: Label,
    pub target: Node,
    pub is_final: bool,
    pub output: F::Value,
    pub next_final_output: F::Value,
}

impl<F: OutputFactory> fmt::Debug for BuilderArc<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let target = match self.target {
            Node::Compiled(c) => format!("Compiled({})", c),
            Node::UnCompiled(_) => "UnCompiled".to_string(),
        };
        write!(
            f,
            "BuilderArc(label: {}, is_final: {}, output: {:?}, next_final_output: {:?}, target: \
             {})",
            self.label, self.is_final, self.output, self.next_final_output, target
        )
    }
}

impl<F> Clone for BuilderArc<F>
where
    F: OutputFactory,
{
    fn clone(&self) -> Self {
        BuilderArc {
            label: self.label,
            target: self.target.clone(),
            is_final: self.is_final,
            output: self.output.clone(),
            next_final_output: self.next_final_output.clone(),
        }
    }
}

fn hash_code<T: Hash>(v: &T) -> u64 {
    let mut state = DefaultHasher::new();
    v.hash(&mut state);
    state.finish()
}

/// Dedups frozen states: maps a node's shape (arcs, outputs, targets) to
/// the address it was already serialized at, so identical suffixes are
/// stored once. Open addressing with quadratic probing; slot 0 means
/// empty since no real node lives at address 0.
struct NodeHash {
    table: GrowableWriter,
    count: usize,
    mask: usize,
}

impl NodeHash {
    pub fn new() -> Self {
        NodeHash {
            table: GrowableWriter::new(8, 16, COMPACT),
            count: 0,
            mask: 15,
        }
    }

    fn nodes_equal<F: OutputFactory>(
        fst: &FST<F>,
        node: &UnCompiledNode<F>,
        address: CompiledAddress,
        reader: &mut dyn BytesReader,
    ) -> Result<bool> {
        let mut scratch_arc = fst.read_first_real_arc(address, reader)?;
        if scratch_arc.bytes_per_arc > 0 && node.num_arcs != scratch_arc.num_arcs {
            return Ok(false);
        }

        for idx in 0..node.num_arcs {
            let arc = &node.arcs[idx];
            if arc.label != scratch_arc.label || arc.is_final != scratch_arc.is_final() {
                return Ok(false);
            }

            if let Some(ref output) = scratch_arc.output {
                if output != &arc.output {
                    return Ok(false);
                }
            } else if !arc.output.is_empty() {
                return Ok(false);
            }

            if let Some(ref output) = scratch_arc.next_final_output {
                if output != &arc.next_final_output {
                    return Ok(false);
                }
            } else if !arc.next_final_output.is_empty() {
                return Ok(false);
            }

            if let Node::Compiled(target) = arc.target {
                if target != scratch_arc.target {
                    return Ok(false);
                }
            }

            if scratch_arc.is_last() {
                return Ok(idx == node.num_arcs - 1);
            }
            fst.read_next_real_arc(&mut scratch_arc, reader)?;
        }
        Ok(false)
    }

    fn node_hash_uncompiled<F: OutputFactory>(fst: &FST<F>, node: &UnCompiledNode<F>) -> u64 {
        let prime = 31u64;
        let mut h = 0u64;
        let no_output = fst.outputs().empty();
        for arc in &node.arcs[0..node.num_arcs] {
            h = prime.wrapping_mul(h).wrapping_add(arc.label as u64);
            if let Node::Compiled(n) = arc.target {
                if n != 0 {
                    h = prime.wrapping_mul(h).wrapping_add((n ^ (n >> 32)) as u64);
                }
            }
            if arc.output != no_output {
                h = prime.wrapping_mul(h).wrapping_add(hash_code(&arc.output));
            }
            if arc.next_final_output != no_output {
                h = prime
                    .wrapping_mul(h)
                    .wrapping_add(hash_code(&arc.next_final_output));
            }
            if arc.is_final {
                h = h.wrapping_add(17);
            }
        }
        h
    }

    fn node_hash_compiled<F: OutputFactory>(
        fst: &FST<F>,
        node: CompiledAddress,
        reader: &mut dyn BytesReader,
    ) -> Result<u64> {
        let prime = 31u64;
        let mut h = 0u64;
        let mut arc = fst.read_first_real_arc(node, reader)?;
        loop {
            h = prime.wrapping_mul(h).wrapping_add(arc.label as u64);
            if arc.target != 0 {
                h = prime
                    .wrapping_mul(h)
                    .wrapping_add((arc.target ^ (arc.target >> 32)) as u64);
            }
            if let Some(ref output) = arc.output {
                h = prime.wrapping_mul(h).wrapping_add(hash_code(output));
            }
            if let Some(ref output) = arc.next_final_output {
                h = prime.wrapping_mul(h).wrapping_add(hash_code(output));
            }
            if arc.is_final() {
                h = h.wrapping_add(17);
            }
            if arc.is_last() {
                break;
            }
            fst.read_next_real_arc(&mut arc, reader)?;
        }
        Ok(h)
    }

    pub fn add<F: OutputFactory>(
        &mut self,
        fst: &mut FST<F>,
        node_in: &UnCompiledNode<F>,
        last_frozen_node: CompiledAddress,
        reused_bytes_per_arc: &mut Vec<usize>,
        allow_array_arcs: bool,
    ) -> Result<CompiledAddress> {
        let h = Self::node_hash_uncompiled(fst, node_in);
        let mut pos = (h as usize) & self.mask;
        let mut c = 0usize;
        loop {
            let v = self.table.get(pos);
            if v == 0 {
                // freeze & add
                let node = fst.add_node(
                    node_in,
                    last_frozen_node,
                    reused_bytes_per_arc,
                    allow_array_arcs,
                )?;
                {
                    let mut reader = fst.bytes_reader();
                    let compiled_hash = Self::node_hash_compiled(fst, node, &mut reader)?;
                    debug_assert_eq!(compiled_hash, h);
                }
                self.count += 1;
                self.table.set(pos, node);
                // rehash at 2/3 occupancy:
                if self.count > 2 * self.table.size() / 3 {
                    self.rehash(fst)?;
                }
                return Ok(node);
            } else {
                let equal = {
                    let mut reader = fst.bytes_reader();
                    Self::nodes_equal(fst, node_in, v, &mut reader)?
                };
                if equal {
                    // same node is already here
                    return Ok(v);
                }
            }

            // quadratic probe
            c += 1;
            pos = (pos + c) & self.mask;
        }
    }

    fn rehash<F: OutputFactory>(&mut self, fst: &FST<F>) -> Result<()> {
        let old_size = self.table.size();
        let new_table = GrowableWriter::new(bits_required(self.count as i64), 2 * old_size, COMPACT);
        self.mask = 2 * old_size - 1;
        let old_table = mem::replace(&mut self.table, new_table);
        let mut reader = fst.bytes_reader();
        for i in 0..old_size {
            let address = old_table.get(i);
            if address != 0 {
                let hash = Self::node_hash_compiled(fst, address, &mut reader)? as usize;
                let mut pos = hash & self.mask;
                let mut c = 0usize;
                loop {
                    if self.table.get(pos) == 0 {
                        self.table.set(pos, address);
                        break;
                    }
                    // quadratic probe
                    c += 1;
                    pos = (pos + c) & self.mask;
                }
            }
        }

        Ok(())
    }
}

// NOTE: not many instances of Node or CompiledNode are in
// memory while the FST is being built; it's only the
// current "frontier":
#[derive(Clone)]
pub enum Node {
    Compiled(CompiledAddress),
    UnCompiled(usize), // index in builder.frontier
}

/// Holds a pending (seen but not yet serialized) node.
pub struct UnCompiledNode<F: OutputFactory> {
    outputs: F,
    pub num_arcs: usize,
    pub arcs: Vec<BuilderArc<F>>,
    pub output: F::Value,
    pub is_final: bool,
    pub input_count: i64,
    // This node's depth, starting from the automaton root
    pub depth: i32,
}

impl<F: OutputFactory> UnCompiledNode<F> {
    pub fn new(outputs: F, depth: i32) -> Self {
        let output = outputs.empty();
        UnCompiledNode {
            outputs,
            num_arcs: 0,
            arcs: Vec::with_capacity(1),
            output,
            is_final: false,
            input_count: 0,
            depth,
        }
    }

    pub fn clear(&mut self) {
        self.num_arcs = 0;
        self.is_final = false;
        self.output = self.outputs.empty();
        self.input_count = 0;

        // We don't clear the depth here because it never changes
        // for nodes on the frontier (even when reused).
    }

    fn get_last_output(&self, label_to_match: Label) -> &F::Value {
        debug_assert!(self.num_arcs > 0);
        debug_assert_eq!(self.arcs[self.num_arcs - 1].label, label_to_match);
        &self.arcs[self.num_arcs - 1].output
    }

    fn set_last_output(&mut self, label_to_match: Label, new_output: F::Value) {
        debug_assert!(self.num_arcs > 0);
        debug_assert_eq!(self.arcs[self.num_arcs - 1].label, label_to_match);
        self.arcs[self.num_arcs - 1].output = new_output;
    }

    fn add_arc(&mut self, label: Label, target: Node) {
        debug_assert!(label >= 0);
        debug_assert!(self.num_arcs == 0 || label > self.arcs[self.num_arcs - 1].label);
        let new_arc = BuilderArc {
            label,
            target,
            is_final: false,
            output: self.outputs.empty(),
            next_final_output: self.outputs.empty(),
        };
        if self.num_arcs == self.arcs.len() {
            self.arcs.push(new_arc);
        } else {
            self.arcs[self.num_arcs] = new_arc;
        }
        self.num_arcs += 1;
    }

    fn replace_last(
        &mut self,
        label_to_match: Label,
        target: Node,
        next_final_output: F::Value,
        is_final: bool,
    ) {
        debug_assert!(self.num_arcs > 0);
        let arc = &mut self.arcs[self.num_arcs - 1];
        debug_assert_eq!(arc.label, label_to_match);
        arc.target = target;
        arc.next_final_output = next_final_output;
        arc.is_final = is_final;
    }

    fn delete_last(&mut self, label: Label) {
        debug_assert!(self.num_arcs > 0);
        debug_assert_eq!(self.arcs[self.num_arcs - 1].label, label);

        self.num_arcs -= 1;
    }

    fn prepend_output(&mut self, output_prefix: &F::Value) {
        for i in 0..self.num_arcs {
            self.arcs[i].output = self.outputs.add(output_prefix, &self.arcs[i].output);
        }
        if self.is_final {
            self.output = self.outputs.add(output_prefix, &self.output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fst::InputType;
    use outputs::{ByteSequenceOutput, ByteSequenceOutputFactory, PositiveIntOutput,
                  PositiveIntOutputFactory};

    fn labels(s: &str) -> Vec<Label> {
        s.bytes().map(Label::from).collect()
    }

    #[test]
    fn test_out_of_order_input_rejected() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&labels("dog"), PositiveIntOutput::new(1)).unwrap();
        let res = builder.add(&labels("cat"), PositiveIntOutput::new(2));
        assert!(res.is_err());
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&labels("cat"), PositiveIntOutput::new(1)).unwrap();
        assert!(builder.add(&labels("cat"), PositiveIntOutput::new(2)).is_err());
    }

    #[test]
    fn test_empty_builder_finishes_to_none() {
        let mut builder: FstBuilder<ByteSequenceOutputFactory> =
            FstBuilder::new(InputType::Byte1, ByteSequenceOutputFactory::new());
        builder.init();
        assert!(builder.finish().unwrap().is_none());
    }

    #[test]
    fn test_suffix_sharing_reduces_nodes() {
        let keys = ["bing", "king", "ping", "ring", "sing", "wing"];

        let mut shared = FstBuilder::new(InputType::Byte1, ByteSequenceOutputFactory::new());
        shared.init();
        for key in &keys {
            shared.add(&labels(key), ByteSequenceOutput::empty()).unwrap();
        }
        let shared_fst = shared.finish().unwrap().unwrap();

        let mut unshared: FstBuilder<ByteSequenceOutputFactory> = FstBuilder::build(
            InputType::Byte1,
            0,
            0,
            false,
            true,
            u32::max_value(),
            ByteSequenceOutputFactory::new(),
            false,
            COMPACT,
            true,
            15,
        );
        unshared.init();
        for key in &keys {
            unshared
                .add(&labels(key), ByteSequenceOutput::empty())
                .unwrap();
        }
        let unshared_fst = unshared.finish().unwrap().unwrap();

        assert!(shared_fst.node_count < unshared_fst.node_count);
        for key in &keys {
            assert!(shared_fst.get(key.as_bytes()).unwrap().is_some());
            assert!(unshared_fst.get(key.as_bytes()).unwrap().is_some());
        }
        assert!(shared_fst.get(b"zing").unwrap().is_none());
    }

    #[test]
    fn test_prune_everything_returns_none() {
        // every suffix is used once, so min_suffix_count1=2 prunes it all
        let mut builder: FstBuilder<ByteSequenceOutputFactory> = FstBuilder::build(
            InputType::Byte1,
            2,
            0,
            true,
            true,
            u32::max_value(),
            ByteSequenceOutputFactory::new(),
            false,
            COMPACT,
            true,
            15,
        );
        builder.init();
        builder.add(&labels("aa"), ByteSequenceOutput::empty()).unwrap();
        builder.add(&labels("ba"), ByteSequenceOutput::empty()).unwrap();
        assert!(builder.finish().unwrap().is_none());
    }

    #[test]
    fn test_term_count() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        for (i, key) in ["ab", "ac", "ad"].iter().enumerate() {
            builder
                .add(&labels(key), PositiveIntOutput::new(i as i64 + 1))
                .unwrap();
        }
        assert_eq!(builder.term_count(), 3);
    }

    #[test]
    fn test_output_prefix_pushing() {
        // car=2, cat=1: the shared prefix "ca" carries min(2,1)=1 and the
        // divergent arcs carry the remainders
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&labels("car"), PositiveIntOutput::new(2)).unwrap();
        builder.add(&labels("cat"), PositiveIntOutput::new(1)).unwrap();
        let fst = builder.finish().unwrap().unwrap();

        assert_eq!(fst.get(b"car").unwrap().map(|o| o.value()), Some(2));
        assert_eq!(fst.get(b"cat").unwrap().map(|o| o.value()), Some(1));
    }

    #[test]
    fn test_many_keys_with_rehash() {
        // enough distinct suffix-shared nodes to force NodeHash rehash
        let mut keys: Vec<String> = Vec::new();
        for a in b'a'..=b'z' {
            for b in b'a'..=b'z' {
                keys.push(format!("{}{}x", a as char, b as char));
            }
        }
        keys.sort();

        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        for (i, key) in keys.iter().enumerate() {
            builder
                .add(&labels(key), PositiveIntOutput::new(i as i64 + 1))
                .unwrap();
        }
        let fst = builder.finish().unwrap().unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(
                fst.get(key.as_bytes()).unwrap().map(|o| o.value()),
                Some(i as i64 + 1),
                "key {}",
                key
            );
        }
    }

    #[test]
    fn test_random_keys_lookup() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::BTreeMap;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut keys: BTreeMap<Vec<u8>, i64> = BTreeMap::new();
        while keys.len() < 300 {
            let len = rng.gen_range(1..10);
            let key: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'f')).collect();
            let next = keys.len() as i64 + 1;
            keys.entry(key).or_insert(next);
        }

        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        for (key, v) in &keys {
            let labels: Vec<Label> = key.iter().map(|b| Label::from(*b)).collect();
            builder.add(&labels, PositiveIntOutput::new(*v)).unwrap();
        }
        let fst = builder.finish().unwrap().unwrap();

        for (key, v) in &keys {
            assert_eq!(fst.get(key).unwrap().map(|o| o.value()), Some(*v));
        }
        for probe in &[&b"zzzz"[..], b"gg", b"abcdefabcdef"] {
            if !keys.contains_key(&probe.to_vec()) {
                assert_eq!(fst.get(probe).unwrap(), None);
            }
        }
    }
}
