/*
 * Copyright (c) 2021 Works Applications Co., Ltd.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::bitvec::BitVector;
use crate::dawg::{Dawg, DawgNode, DawgUnit};
use crate::error::BuildError;
use crate::hash::mix;

const INITIAL_TABLE_SIZE: usize = 1 << 10;

/// On-line builder of a minimal DAWG.
///
/// Keys must be inserted in strictly ascending byte order, each key
/// conceptually terminated by an implicit `0x00`. The path of the most
/// recent key stays mutable (the frontier); when a new key diverges from
/// it, the subtree below the divergence point is frozen and merged with
/// any equivalent frozen subtree.
pub struct DawgBuilder {
    nodes: Vec<DawgNode>,
    units: Vec<DawgUnit>,
    labels: Vec<u8>,
    is_intersections: BitVector,
    table: Vec<u32>,
    node_stack: Vec<u32>,
    recycle_bin: Vec<u32>,
    num_states: usize,
}

impl DawgBuilder {
    pub fn new() -> DawgBuilder {
        let mut builder = DawgBuilder {
            nodes: Vec::new(),
            units: Vec::new(),
            labels: Vec::new(),
            is_intersections: BitVector::new(),
            table: vec![0; INITIAL_TABLE_SIZE],
            node_stack: Vec::new(),
            recycle_bin: Vec::new(),
            num_states: 1,
        };

        builder.append_node();
        builder.append_unit();

        // the sentinel root never matches a key byte
        builder.nodes[0].set_label(0xFF);
        builder.node_stack.push(0);

        builder
    }

    /// Inserts a key with a nonnegative value. Keys must arrive in
    /// strictly ascending order; an equal key is ignored (the first
    /// inserted value wins).
    pub fn insert(&mut self, key: &[u8], value: i32) -> Result<(), BuildError> {
        if value < 0 {
            return Err(BuildError::NegativeValue);
        }
        if key.is_empty() {
            return Err(BuildError::ZeroLengthKey);
        }

        let length = key.len();
        let mut id: u32 = 0;
        let mut key_pos: usize = 0;

        // walk the frontier while the key matches it
        while key_pos <= length {
            let child_id = self.nodes[id as usize].child();
            if child_id == 0 {
                break;
            }

            let key_label = if key_pos < length { key[key_pos] } else { 0 };
            let unit_label = self.nodes[child_id as usize].label();

            if key_label < unit_label {
                return Err(BuildError::WrongKeyOrder);
            }
            if key_label > unit_label {
                self.nodes[child_id as usize].set_has_sibling(true);
                self.flush(child_id)?;
                break;
            }

            id = child_id;
            key_pos += 1;
        }

        if key_pos > length {
            // duplicate key, the whole path including the terminator matched
            return Ok(());
        }

        // append the diverged remainder of the key plus the terminator
        while key_pos <= length {
            let key_label = if key_pos < length { key[key_pos] } else { 0 };
            let child_id = self.append_node();

            if self.nodes[id as usize].child() == 0 {
                self.nodes[child_id as usize].set_is_state(true);
            }
            let sibling = self.nodes[id as usize].child();
            self.nodes[child_id as usize].set_sibling(sibling);
            self.nodes[child_id as usize].set_label(key_label);
            self.nodes[id as usize].set_child(child_id);
            self.node_stack.push(child_id);

            id = child_id;
            key_pos += 1;
        }
        self.nodes[id as usize].set_value(value);
        Ok(())
    }

    /// Freezes the remaining frontier and returns the finished graph.
    pub fn finish(mut self) -> Result<Dawg, BuildError> {
        self.flush(0)?;

        self.units[0] = DawgUnit::new(self.nodes[0].unit());
        self.labels[0] = self.nodes[0].label();

        let mut is_intersections = self.is_intersections;
        is_intersections.build()?;

        Ok(Dawg {
            units: self.units,
            labels: self.labels,
            is_intersections,
        })
    }

    /// Freezes frontier subtrees until `anchor` becomes the top of the
    /// stack, then pops the anchor itself. Each popped node is frozen
    /// together with its sibling chain, deduplicated against the table.
    fn flush(&mut self, anchor: u32) -> Result<(), BuildError> {
        while *self.node_stack.last().expect("frontier stack is never empty") != anchor {
            let node_id = self.node_stack.pop().expect("checked above");

            if self.num_states >= self.table.len() - (self.table.len() >> 2) {
                self.expand_table()?;
            }

            let mut num_siblings: u32 = 0;
            let mut i = node_id;
            while i != 0 {
                num_siblings += 1;
                i = self.nodes[i as usize].sibling();
            }

            let (found_id, hash_id) = self.find_node(node_id);
            let match_id = if found_id != 0 {
                self.is_intersections.set(found_id as usize, true);
                found_id
            } else {
                // freeze the sibling chain in reverse order, the chain is in
                // descending label order so the group lands ascending
                let mut unit_id = 0;
                for _ in 0..num_siblings {
                    unit_id = self.append_unit();
                }
                let mut i = node_id;
                while i != 0 {
                    self.units[unit_id as usize] = DawgUnit::new(self.nodes[i as usize].unit());
                    self.labels[unit_id as usize] = self.nodes[i as usize].label();
                    unit_id -= 1;
                    i = self.nodes[i as usize].sibling();
                }
                let group_id = unit_id + 1;
                self.table[hash_id as usize] = group_id;
                self.num_states += 1;
                group_id
            };

            let mut i = node_id;
            while i != 0 {
                let next = self.nodes[i as usize].sibling();
                self.free_node(i);
                i = next;
            }

            let top = *self.node_stack.last().expect("anchor is still below");
            self.nodes[top as usize].set_child(match_id);
        }
        self.node_stack.pop();
        Ok(())
    }

    fn expand_table(&mut self) -> Result<(), BuildError> {
        let table_size = self.table.len() << 1;
        self.table.clear();
        self.table.try_reserve(table_size)?;
        self.table.resize(table_size, 0);

        // reinsert the head of every frozen sibling group
        for id in 1..self.units.len() as u32 {
            if self.labels[id as usize] == 0 || self.units[id as usize].is_state() {
                let hash_id = self.find_unit(id);
                self.table[hash_id as usize] = id;
            }
        }
        Ok(())
    }

    /// Probes for an empty slot for `id` during a table rebuild. Every
    /// frozen group is distinct, so no equality check is needed here.
    fn find_unit(&self, id: u32) -> u32 {
        let mut hash_id = self.hash_unit(id) % self.table.len() as u32;
        loop {
            if self.table[hash_id as usize] == 0 {
                return hash_id;
            }
            hash_id = (hash_id + 1) % self.table.len() as u32;
        }
    }

    /// Probes for a frozen group equal to the chain rooted at `node_id`.
    /// Returns `(match_id, hash_id)`; `match_id == 0` means a miss, with
    /// `hash_id` pointing at the empty slot to fill.
    fn find_node(&self, node_id: u32) -> (u32, u32) {
        let mut hash_id = self.hash_node(node_id) % self.table.len() as u32;
        loop {
            let unit_id = self.table[hash_id as usize];
            if unit_id == 0 {
                return (0, hash_id);
            }
            if self.are_equal(node_id, unit_id) {
                return (unit_id, hash_id);
            }
            hash_id = (hash_id + 1) % self.table.len() as u32;
        }
    }

    /// Compares the frontier chain at `node_id` with the frozen group
    /// whose head is `unit_id`, member by member.
    fn are_equal(&self, node_id: u32, mut unit_id: u32) -> bool {
        // the chains must have the same length
        let mut i = self.nodes[node_id as usize].sibling();
        while i != 0 {
            if !self.units[unit_id as usize].has_sibling() {
                return false;
            }
            unit_id += 1;
            i = self.nodes[i as usize].sibling();
        }
        if self.units[unit_id as usize].has_sibling() {
            return false;
        }

        // frontier chain is in reverse order of the frozen group
        let mut i = node_id;
        while i != 0 {
            if self.nodes[i as usize].unit() != self.units[unit_id as usize].unit()
                || self.nodes[i as usize].label() != self.labels[unit_id as usize]
            {
                return false;
            }
            i = self.nodes[i as usize].sibling();
            unit_id = unit_id.wrapping_sub(1);
        }
        true
    }

    fn hash_unit(&self, mut id: u32) -> u32 {
        let mut hash_value = 0;
        loop {
            let unit = self.units[id as usize].unit();
            let label = self.labels[id as usize] as u32;
            hash_value ^= mix((label << 24) ^ unit);

            if !self.units[id as usize].has_sibling() {
                break;
            }
            id += 1;
        }
        hash_value
    }

    fn hash_node(&self, mut id: u32) -> u32 {
        let mut hash_value = 0;
        while id != 0 {
            let unit = self.nodes[id as usize].unit();
            let label = self.nodes[id as usize].label() as u32;
            hash_value ^= mix((label << 24) ^ unit);
            id = self.nodes[id as usize].sibling();
        }
        hash_value
    }

    fn append_unit(&mut self) -> u32 {
        self.is_intersections.append();
        self.units.push(DawgUnit::default());
        self.labels.push(0);

        (self.is_intersections.size() - 1) as u32
    }

    fn append_node(&mut self) -> u32 {
        match self.recycle_bin.pop() {
            Some(id) => {
                self.nodes[id as usize] = DawgNode::default();
                id
            }
            None => {
                let id = self.nodes.len() as u32;
                self.nodes.push(DawgNode::default());
                id
            }
        }
    }

    fn free_node(&mut self, id: u32) {
        self.recycle_bin.push(id);
    }
}

impl Default for DawgBuilder {
    fn default() -> Self {
        DawgBuilder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use claim::assert_matches;

    fn build(keys: &[(&[u8], i32)]) -> Dawg {
        let mut builder = DawgBuilder::new();
        for &(key, value) in keys {
            builder.insert(key, value).expect("sorted input");
        }
        builder.finish().expect("finish")
    }

    fn leaf_value(dawg: &Dawg, key: &[u8]) -> Option<i32> {
        let mut id = dawg.root();
        for pos in 0..=key.len() {
            let label = if pos < key.len() { key[pos] } else { 0 };
            let mut child = dawg.child(id);
            loop {
                if child == 0 {
                    return None;
                }
                if dawg.label(child) == label {
                    break;
                }
                child = dawg.sibling(child);
            }
            id = child;
        }
        Some(dawg.value(id))
    }

    #[test]
    fn single_key() {
        let dawg = build(&[(b"a", 7)]);
        assert_eq!(leaf_value(&dawg, b"a"), Some(7));
        assert_eq!(leaf_value(&dawg, b"b"), None);
        assert_eq!(leaf_value(&dawg, b"ab"), None);
    }

    #[test]
    fn branching() {
        let dawg = build(&[(b"a", 10), (b"ab", 20), (b"b", 30)]);
        assert_eq!(leaf_value(&dawg, b"a"), Some(10));
        assert_eq!(leaf_value(&dawg, b"ab"), Some(20));
        assert_eq!(leaf_value(&dawg, b"b"), Some(30));
        assert_eq!(leaf_value(&dawg, b"c"), None);
    }

    #[test]
    fn shared_suffix_is_merged() {
        // equal values make the "x" + terminator subtrees equivalent,
        // so they are canonicalized to one unit group
        let dawg = build(&[(b"ax", 5), (b"bx", 5), (b"cx", 5)]);
        assert!(dawg.num_intersections() >= 1);
        assert_eq!(leaf_value(&dawg, b"ax"), Some(5));
        assert_eq!(leaf_value(&dawg, b"bx"), Some(5));
        assert_eq!(leaf_value(&dawg, b"cx"), Some(5));
    }

    #[test]
    fn distinct_values_are_not_merged() {
        // the value lives in the leaf unit, so these subtrees differ
        let dawg = build(&[(b"ax", 1), (b"bx", 2)]);
        assert_eq!(dawg.num_intersections(), 0);
        assert_eq!(leaf_value(&dawg, b"ax"), Some(1));
        assert_eq!(leaf_value(&dawg, b"bx"), Some(2));
    }

    #[test]
    fn duplicate_key_keeps_first_value() {
        let mut builder = DawgBuilder::new();
        builder.insert(b"abc", 1).expect("first");
        builder.insert(b"abc", 2).expect("duplicate is a no-op");
        let dawg = builder.finish().expect("finish");
        assert_eq!(leaf_value(&dawg, b"abc"), Some(1));
    }

    #[test]
    fn rejects_wrong_order() {
        let mut builder = DawgBuilder::new();
        builder.insert(b"b", 0).expect("first");
        assert_matches!(builder.insert(b"a", 1), Err(BuildError::WrongKeyOrder));
    }

    #[test]
    fn rejects_prefix_after_extension() {
        // "ab" must precede "abc"; the reverse order diverges on the
        // implicit terminator
        let mut builder = DawgBuilder::new();
        builder.insert(b"abc", 0).expect("first");
        assert_matches!(builder.insert(b"ab", 1), Err(BuildError::WrongKeyOrder));
    }

    #[test]
    fn rejects_negative_value() {
        let mut builder = DawgBuilder::new();
        assert_matches!(builder.insert(b"x", -1), Err(BuildError::NegativeValue));
    }

    #[test]
    fn rejects_empty_key() {
        let mut builder = DawgBuilder::new();
        assert_matches!(builder.insert(b"", 0), Err(BuildError::ZeroLengthKey));
    }

    #[test]
    fn empty_builder_finishes() {
        let dawg = DawgBuilder::new().finish().expect("finish");
        assert_eq!(dawg.child(dawg.root()), 0);
        assert_eq!(dawg.num_intersections(), 0);
    }

    #[test]
    fn many_keys_expand_the_state_table() {
        // enough distinct two-byte keys to push the table past the
        // initial 1024 slots at 75% load
        let mut builder = DawgBuilder::new();
        let mut count = 0i32;
        for a in 1u8..=40 {
            for b in 1u8..=40 {
                builder.insert(&[a, b, (a ^ b) | 0x80], count).expect("sorted");
                count += 1;
            }
        }
        let dawg = builder.finish().expect("finish");

        let mut count = 0i32;
        for a in 1u8..=40 {
            for b in 1u8..=40 {
                assert_eq!(leaf_value(&dawg, &[a, b, (a ^ b) | 0x80]), Some(count));
                count += 1;
            }
        }
    }
}
