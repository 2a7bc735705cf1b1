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

//! Rewrites a finished automaton into the packed (forward-read) form.
//!
//! The rewrite walks nodes in reverse ordinal order, so every arc target
//! lies ahead of the arc in the new image. Targets are then encoded as the
//! cheapest of three forms: implicit (`BIT_TARGET_NEXT`), a forward delta
//! (`BIT_TARGET_DELTA`), or a vlong that is either an index into a small
//! table of the most-referenced nodes or the raw absolute address. Since
//! the reader derefs any code below the table size through the table, the
//! raw form is only used for addresses at or past the table size.
//!
//! Because the final addresses are not known until the nodes are written,
//! the rewrite iterates to a fixed point: each pass corrects the guessed
//! addresses with the error observed so far and repeats until no address
//! moves.

use std::cmp::{max, Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use error::{ErrorKind, Result};
use fst::{Arc, CompiledAddress, FST, ARCS_AS_FIXED_ARRAY, BIT_ARC_HAS_FINAL_OUTPUT,
          BIT_ARC_HAS_OUTPUT, BIT_FINAL_ARC, BIT_LAST_ARC, BIT_STOP_NODE, BIT_TARGET_DELTA,
          BIT_TARGET_NEXT};
use io::DataOutput;
use outputs::OutputFactory;
use packed::{self, GrowableWriter};

#[derive(Eq, PartialEq)]
struct NodeAndInCount {
    node: CompiledAddress,
    count: i64,
}

impl Ord for NodeAndInCount {
    fn cmp(&self, other: &NodeAndInCount) -> Ordering {
        // ties break toward the smaller ordinal
        self.count
            .cmp(&other.count)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for NodeAndInCount {
    fn partial_cmp(&self, other: &NodeAndInCount) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: OutputFactory> FST<F> {
    /// Rebuilds this automaton into an equivalent packed one. The source
    /// must have been built with `will_pack_later` so the ordinal address
    /// table and incoming-arc counts are still around, and must already be
    /// finished.
    ///
    /// Nodes referenced at least `min_in_count_deref` times compete for a
    /// slot in the deref table; at most `max_deref_nodes` slots are kept.
    pub fn pack(
        &mut self,
        min_in_count_deref: usize,
        max_deref_nodes: usize,
        acceptable_overhead_ratio: f32,
    ) -> Result<FST<F>> {
        if self.start_node == -1 {
            bail!(ErrorKind::IllegalState("call finish first!".into()));
        }
        let in_counts = match self.in_counts.take() {
            Some(ic) => ic,
            None => bail!(ErrorKind::IllegalArgument(
                "cannot pack automaton: it was not built with pack=true".into()
            )),
        };
        debug_assert!(self.node_address.is_some());

        // most-referenced nodes get the smallest table indices
        let top_n = max_deref_nodes.min(self.node_count as usize);
        let mut queue: BinaryHeap<Reverse<NodeAndInCount>> = BinaryHeap::with_capacity(top_n);
        for node in 1..=self.node_count {
            let count = in_counts.get(node as usize);
            if count < min_in_count_deref as i64 {
                continue;
            }
            if queue.len() < top_n {
                queue.push(Reverse(NodeAndInCount { node, count }));
            } else if let Some(least) = queue.peek() {
                if count > least.0.count {
                    queue.pop();
                    queue.push(Reverse(NodeAndInCount { node, count }));
                }
            }
        }
        drop(in_counts);

        let mut top_node_map: HashMap<CompiledAddress, i64> = HashMap::with_capacity(queue.len());
        let mut index = queue.len() as i64;
        while let Some(Reverse(n)) = queue.pop() {
            index -= 1;
            top_node_map.insert(n.node, index);
        }
        debug_assert_eq!(index, 0);

        // Coarse first guess: assume the packed image is no larger than the
        // reversed one, measuring each node from the end of the old image.
        let old_position = self.bytes_store.get_position() as i64;
        let mut new_node_address = GrowableWriter::new(
            packed::bits_required(old_position),
            1 + self.node_count as usize,
            acceptable_overhead_ratio,
        );
        {
            let node_address = self.node_address.as_ref().unwrap();
            for node in 1..=self.node_count {
                new_node_address.set(node as usize, 1 + old_position - node_address.get(node as usize));
            }
        }

        let block_bits = self.bytes_store.block_bits();
        let mut reader = self.bytes_reader();
        let table_size = top_node_map.len() as i64;
        let mut passes = 0usize;

        let mut fst = loop {
            passes += 1;
            let mut fst = FST::new_packed(self.input_type, self.outputs().clone(), block_bits);
            let mut changed = false;
            let mut neg_delta = false;
            let mut address_error = 0i64;

            for i in 0..self.node_count {
                let node = self.node_count - i;
                fst.node_count += 1;
                let node_start = fst.bytes_store.get_position() as i64;
                if node_start != new_node_address.get(node as usize) {
                    address_error = node_start - new_node_address.get(node as usize);
                    changed = true;
                    new_node_address.set(node as usize, node_start);
                }

                let mut node_arc_count = 0i64;
                let mut bytes_per_arc = 0usize;
                let mut retry = false;
                let mut any_neg_delta;
                loop {
                    any_neg_delta = false;
                    let mut max_bytes_per_arc = 0usize;
                    let mut arc: Arc<F::Value> = self.read_first_real_arc(node, &mut reader)?;
                    let use_arc_array = arc.bytes_per_arc != 0;
                    if use_arc_array {
                        if bytes_per_arc == 0 {
                            bytes_per_arc = arc.bytes_per_arc;
                        }
                        fst.bytes_store.write_byte(ARCS_AS_FIXED_ARRAY)?;
                        fst.bytes_store.write_vint(arc.num_arcs as i32)?;
                        fst.bytes_store.write_vint(bytes_per_arc as i32)?;
                    }

                    loop {
                        let arc_start_pos = fst.bytes_store.get_position();
                        node_arc_count += 1;

                        let mut flags = 0u8;
                        if arc.is_last() {
                            flags += BIT_LAST_ARC;
                        }
                        if !use_arc_array && node != 1 && arc.target == node - 1 {
                            flags += BIT_TARGET_NEXT;
                        }
                        if arc.is_final() {
                            flags += BIT_FINAL_ARC;
                            if arc.next_final_output.is_some() {
                                flags += BIT_ARC_HAS_FINAL_OUTPUT;
                            }
                        } else {
                            debug_assert!(arc.next_final_output.is_none());
                        }
                        if arc.target <= 0 {
                            flags += BIT_STOP_NODE;
                        }
                        if arc.output.is_some() {
                            flags += BIT_ARC_HAS_OUTPUT;
                        }

                        let do_write_target = arc.target > 0 && (flags & BIT_TARGET_NEXT) == 0;
                        let mut abs_ptr = 0i64;
                        if do_write_target {
                            let target_address =
                                new_node_address.get(arc.target as usize) + address_error;
                            // A raw address below the table size would be
                            // misread as a table index, so it only competes
                            // when unambiguous.
                            let abs_ok = match top_node_map.get(&arc.target) {
                                Some(&idx) => {
                                    abs_ptr = idx;
                                    true
                                }
                                None => {
                                    abs_ptr = target_address;
                                    target_address >= table_size
                                }
                            };
                            // estimate assuming flags and a one-byte label
                            let mut delta =
                                target_address - fst.bytes_store.get_position() as i64 - 2;
                            if delta < 0 {
                                any_neg_delta = true;
                                delta = 0;
                            }
                            if !abs_ok || delta < abs_ptr {
                                flags |= BIT_TARGET_DELTA;
                            }
                        }
                        debug_assert_ne!(flags, ARCS_AS_FIXED_ARRAY);

                        fst.bytes_store.write_byte(flags)?;
                        self.write_label(&mut fst.bytes_store, arc.label)?;
                        if let Some(ref output) = arc.output {
                            self.outputs().write(output, &mut fst.bytes_store)?;
                            if !retry {
                                fst.arc_with_output_count += 1;
                            }
                        }
                        if let Some(ref final_output) = arc.next_final_output {
                            self.outputs()
                                .write_final_output(final_output, &mut fst.bytes_store)?;
                        }

                        if do_write_target {
                            if (flags & BIT_TARGET_DELTA) != 0 {
                                let mut delta = new_node_address.get(arc.target as usize)
                                    + address_error
                                    - fst.bytes_store.get_position() as i64;
                                if delta < 0 {
                                    any_neg_delta = true;
                                    delta = 0;
                                }
                                fst.bytes_store.write_vlong(delta)?;
                            } else {
                                fst.bytes_store.write_vlong(abs_ptr)?;
                            }
                        }

                        if use_arc_array {
                            let arc_end = fst.bytes_store.get_position();
                            max_bytes_per_arc = max(max_bytes_per_arc, arc_end - arc_start_pos);
                            // an arc can overflow the stride; the retry
                            // below rewrites the node if so
                            if arc_start_pos + bytes_per_arc > arc_end {
                                fst.bytes_store
                                    .skip_bytes(arc_start_pos + bytes_per_arc - arc_end);
                            }
                        }

                        if arc.is_last() {
                            break;
                        }
                        self.read_next_real_arc(&mut arc, &mut reader)?;
                    }

                    if use_arc_array
                        && !(max_bytes_per_arc == bytes_per_arc
                            || (retry && max_bytes_per_arc <= bytes_per_arc))
                    {
                        // converge on the true stride for this node
                        bytes_per_arc = max_bytes_per_arc;
                        fst.bytes_store.truncate(node_start as usize);
                        node_arc_count = 0;
                        retry = true;
                    } else {
                        break;
                    }
                }
                neg_delta |= any_neg_delta;
                fst.arc_count += node_arc_count;
            }

            if !changed {
                debug_assert!(!neg_delta);
                break fst;
            }
        };
        debug!(
            "packed {} nodes in {} passes: {} -> {} bytes",
            self.node_count,
            passes,
            old_position,
            fst.bytes_store.get_position()
        );

        let mut max_address = 0i64;
        for node in top_node_map.keys() {
            max_address = max(max_address, new_node_address.get(*node as usize));
        }
        let mut table = packed::get_mutable_by_ratio(
            top_node_map.len(),
            packed::bits_required(max_address),
            acceptable_overhead_ratio,
        );
        for (node, idx) in &top_node_map {
            table.set(*idx as usize, new_node_address.get(*node as usize));
        }
        fst.node_ref_to_address = Some(table);

        fst.start_node = if self.start_node > 0 {
            new_node_address.get(self.start_node as usize)
        } else {
            self.start_node
        };
        if let Some(ref empty_output) = self.empty_output {
            fst.set_empty_output(empty_output.clone());
        }

        debug_assert_eq!(fst.node_count, self.node_count);
        debug_assert_eq!(fst.arc_count, self.arc_count);
        debug_assert_eq!(fst.arc_with_output_count, self.arc_with_output_count);

        fst.bytes_store.finish();
        fst.cache_root_arcs()?;
        Ok(fst)
    }
}

#[cfg(test)]
mod tests {
    use builder::FstBuilder;
    use fst::{InputType, Label, FST};
    use io::ByteArrayDataInput;
    use outputs::{Output, PositiveIntOutput, PositiveIntOutputFactory};
    use packed::DEFAULT;

    fn labels(s: &str) -> Vec<Label> {
        s.bytes().map(Label::from).collect()
    }

    fn packing_builder() -> FstBuilder<PositiveIntOutputFactory> {
        let mut builder = FstBuilder::build(
            InputType::Byte1,
            0,
            0,
            true,
            true,
            u32::max_value(),
            PositiveIntOutputFactory::new(),
            true,
            DEFAULT,
            true,
            15,
        );
        builder.init();
        builder
    }

    // shared suffix pushes the per-key output onto the root arcs, so the
    // suffix chain is referenced by every key and lands in the deref table
    fn keys() -> Vec<String> {
        (b'a'..=b'z').map(|c| format!("{}ation", c as char)).collect()
    }

    #[test]
    fn test_pack_preserves_lookups() {
        let keys = keys();

        let mut plain = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        plain.init();
        let mut packing = packing_builder();
        for (i, key) in keys.iter().enumerate() {
            let output = PositiveIntOutput::new(i as i64 + 1);
            plain.add(&labels(key), output.clone()).unwrap();
            packing.add(&labels(key), output).unwrap();
        }
        let plain = plain.finish().unwrap().unwrap();
        let packed = packing.finish().unwrap().unwrap();
        assert!(packed.packed);
        assert!(!plain.packed);

        for key in &keys {
            assert_eq!(
                packed.get(key.as_bytes()).unwrap(),
                plain.get(key.as_bytes()).unwrap(),
                "lookup of {}",
                key
            );
        }
        assert_eq!(packed.get(b"nation!").unwrap(), None);
        assert_eq!(packed.get(b"natio").unwrap(), None);
        assert_eq!(packed.node_count, plain.node_count);
        assert_eq!(packed.arc_count, plain.arc_count);
    }

    #[test]
    fn test_packed_save_load_round_trip() {
        let keys = keys();
        let mut builder = packing_builder();
        builder.add(&[], PositiveIntOutput::new(42)).unwrap();
        for (i, key) in keys.iter().enumerate() {
            builder
                .add(&labels(key), PositiveIntOutput::new(i as i64 + 1))
                .unwrap();
        }
        let packed = builder.finish().unwrap().unwrap();

        let mut blob: Vec<u8> = Vec::new();
        packed.save(&mut blob).unwrap();

        let mut input = ByteArrayDataInput::new(&blob[..]);
        let loaded = FST::from_input(&mut input, PositiveIntOutputFactory::new()).unwrap();
        assert!(loaded.packed);
        assert_eq!(loaded.get(b"").unwrap().map(|o| o.value()), Some(42));
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(
                loaded.get(key.as_bytes()).unwrap().map(|o| o.value()),
                Some(i as i64 + 1),
                "lookup of {}",
                key
            );
        }
        assert_eq!(loaded.get(b"zzz").unwrap(), None);
    }

    #[test]
    fn test_saving_loaded_packed_fst_rejected() {
        let mut builder = packing_builder();
        for (i, key) in keys().iter().enumerate() {
            builder
                .add(&labels(key), PositiveIntOutput::new(i as i64 + 1))
                .unwrap();
        }
        let packed = builder.finish().unwrap().unwrap();

        let mut blob: Vec<u8> = Vec::new();
        packed.save(&mut blob).unwrap();
        let mut input = ByteArrayDataInput::new(&blob[..]);
        let loaded = FST::from_input(&mut input, PositiveIntOutputFactory::new()).unwrap();

        let mut resave: Vec<u8> = Vec::new();
        assert!(loaded.save(&mut resave).is_err());
    }

    #[test]
    fn test_pack_without_bookkeeping_fails() {
        let mut builder = FstBuilder::new(InputType::Byte1, PositiveIntOutputFactory::new());
        builder.init();
        builder.add(&labels("abc"), PositiveIntOutput::new(7)).unwrap();
        let mut fst = builder.finish().unwrap().unwrap();
        assert!(fst.pack(3, 10, DEFAULT).is_err());
    }
}
