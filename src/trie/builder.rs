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

use crate::dawg::Dawg;
use crate::error::BuildError;
use crate::trie::unit::BuilderUnit;

const BLOCK_SIZE: usize = 256;
const NUM_EXTRA_BLOCKS: usize = 16;
const NUM_EXTRAS: usize = BLOCK_SIZE * NUM_EXTRA_BLOCKS;

const UPPER_MASK: u32 = 0xFF << 21;
const LOWER_MASK: u32 = 0xFF;

/// Bookkeeping record for one unit of the active window. `prev`/`next`
/// thread the unfixed slots of the window into a circular list.
#[derive(Clone, Copy, Default)]
struct ExtraUnit {
    prev: u32,
    next: u32,
    is_fixed: bool,
    is_used: bool,
}

/// Converts a frozen DAWG into the packed double array.
///
/// The unit array grows one 256-slot block at a time; only the 16 most
/// recent blocks keep free-list records (reused modulo 4096), so the
/// offset search cost stays bounded while older blocks are finalized.
pub struct DoubleArrayBuilder {
    units: Vec<BuilderUnit>,
    extras: Vec<ExtraUnit>,
    labels: Vec<u8>,
    table: Vec<u32>,
    extras_head: u32,
}

impl DoubleArrayBuilder {
    pub fn new() -> DoubleArrayBuilder {
        DoubleArrayBuilder {
            units: Vec::new(),
            extras: Vec::new(),
            labels: Vec::new(),
            table: Vec::new(),
            extras_head: 0,
        }
    }

    pub fn build(&mut self, dawg: &Dawg) -> Result<(), BuildError> {
        self.units.try_reserve(dawg.size().next_power_of_two())?;

        self.table.try_reserve(dawg.num_intersections())?;
        self.table.resize(dawg.num_intersections(), 0);

        self.extras = vec![ExtraUnit::default(); NUM_EXTRAS];

        self.reserve_id(0);
        self.extra_mut(0).is_used = true;
        self.units[0].set_offset(1)?;
        self.units[0].set_label(0);

        if dawg.child(dawg.root()) != 0 {
            self.build_double_array(dawg, dawg.root(), 0)?;
        }

        self.fix_all_blocks();
        Ok(())
    }

    /// Consumes the builder, yielding the raw unit image.
    pub fn into_units(self) -> Vec<u32> {
        self.units.into_iter().map(|unit| unit.unit()).collect()
    }

    fn num_blocks(&self) -> usize {
        self.units.len() / BLOCK_SIZE
    }

    #[inline(always)]
    fn extra(&self, id: u32) -> &ExtraUnit {
        &self.extras[id as usize % NUM_EXTRAS]
    }

    #[inline(always)]
    fn extra_mut(&mut self, id: u32) -> &mut ExtraUnit {
        &mut self.extras[id as usize % NUM_EXTRAS]
    }

    fn build_double_array(
        &mut self,
        dawg: &Dawg,
        dawg_id: u32,
        dic_id: u32,
    ) -> Result<(), BuildError> {
        if dawg.is_leaf(dawg_id) {
            return Ok(());
        }

        let dawg_child_id = dawg.child(dawg_id);
        if dawg.is_intersection(dawg_child_id) {
            // a shared subtree may already be in place; reuse it if the
            // XOR delta fits either offset layout
            let intersection_id = dawg.intersection_id(dawg_child_id);
            let offset = self.table[intersection_id as usize];
            if offset != 0 {
                let offset = offset ^ dic_id;
                if offset & UPPER_MASK == 0 || offset & LOWER_MASK == 0 {
                    if dawg.is_leaf(dawg_child_id) {
                        self.units[dic_id as usize].set_has_leaf(true);
                    }
                    self.units[dic_id as usize].set_offset(offset)?;
                    return Ok(());
                }
            }
        }

        let offset = self.arrange_children(dawg, dawg_id, dic_id)?;

        if dawg.is_intersection(dawg_child_id) {
            self.table[dawg.intersection_id(dawg_child_id) as usize] = offset;
        }

        let mut dawg_child_id = dawg_child_id;
        loop {
            let dic_child_id = offset ^ dawg.label(dawg_child_id) as u32;
            self.build_double_array(dawg, dawg_child_id, dic_child_id)?;
            dawg_child_id = dawg.sibling(dawg_child_id);
            if dawg_child_id == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Places the children of `dawg_id` at a collision-free offset and
    /// returns that offset.
    fn arrange_children(
        &mut self,
        dawg: &Dawg,
        dawg_id: u32,
        dic_id: u32,
    ) -> Result<u32, BuildError> {
        self.labels.clear();
        let mut dawg_child_id = dawg.child(dawg_id);
        while dawg_child_id != 0 {
            self.labels.push(dawg.label(dawg_child_id));
            dawg_child_id = dawg.sibling(dawg_child_id);
        }

        let offset = self.find_valid_offset(dic_id);
        self.units[dic_id as usize].set_offset(dic_id ^ offset)?;

        let mut dawg_child_id = dawg.child(dawg_id);
        for i in 0..self.labels.len() {
            let dic_child_id = offset ^ self.labels[i] as u32;
            self.reserve_id(dic_child_id);

            if dawg.is_leaf(dawg_child_id) {
                self.units[dic_id as usize].set_has_leaf(true);
                self.units[dic_child_id as usize].set_value(dawg.value(dawg_child_id));
            } else {
                let label = self.labels[i];
                self.units[dic_child_id as usize].set_label(label);
            }

            dawg_child_id = dawg.sibling(dawg_child_id);
        }
        self.extra_mut(offset).is_used = true;

        Ok(offset)
    }

    fn find_valid_offset(&self, id: u32) -> u32 {
        if self.extras_head >= self.units.len() as u32 {
            // no free slot in the window; a fresh offset past the end
            // keeps the low byte of the delta zero
            return self.units.len() as u32 | (id & LOWER_MASK);
        }

        let mut unfixed_id = self.extras_head;
        loop {
            let offset = unfixed_id ^ self.labels[0] as u32;
            if self.is_valid_offset(id, offset) {
                return offset;
            }
            unfixed_id = self.extra(unfixed_id).next;
            if unfixed_id == self.extras_head {
                break;
            }
        }

        self.units.len() as u32 | (id & LOWER_MASK)
    }

    fn is_valid_offset(&self, id: u32, offset: u32) -> bool {
        if self.extra(offset).is_used {
            return false;
        }

        let rel_offset = id ^ offset;
        if rel_offset & LOWER_MASK != 0 && rel_offset & UPPER_MASK != 0 {
            return false;
        }

        for i in 1..self.labels.len() {
            if self.extra(offset ^ self.labels[i] as u32).is_fixed {
                return false;
            }
        }
        true
    }

    /// Removes `id` from the free list and marks it fixed, growing the
    /// array when `id` is past the end.
    fn reserve_id(&mut self, id: u32) {
        if id >= self.units.len() as u32 {
            self.expand_units();
        }

        if id == self.extras_head {
            self.extras_head = self.extra(id).next;
            if self.extras_head == id {
                self.extras_head = self.units.len() as u32;
            }
        }
        let prev = self.extra(id).prev;
        let next = self.extra(id).next;
        self.extra_mut(prev).next = next;
        self.extra_mut(next).prev = prev;
        self.extra_mut(id).is_fixed = true;
    }

    fn expand_units(&mut self) {
        let src_num_units = self.units.len() as u32;
        let src_num_blocks = self.num_blocks();

        let dest_num_units = src_num_units + BLOCK_SIZE as u32;
        let dest_num_blocks = src_num_blocks + 1;

        if dest_num_blocks > NUM_EXTRA_BLOCKS {
            self.fix_block((src_num_blocks - NUM_EXTRA_BLOCKS) as u32);
        }

        self.units.resize(dest_num_units as usize, BuilderUnit::default());

        if dest_num_blocks > NUM_EXTRA_BLOCKS {
            // the ring records of the evicted block are being reused
            for id in src_num_units..dest_num_units {
                self.extra_mut(id).is_used = false;
                self.extra_mut(id).is_fixed = false;
            }
        }

        // chain the fresh block into a circle of its own
        for i in (src_num_units + 1)..dest_num_units {
            self.extra_mut(i - 1).next = i;
            self.extra_mut(i).prev = i - 1;
        }
        self.extra_mut(src_num_units).prev = dest_num_units - 1;
        self.extra_mut(dest_num_units - 1).next = src_num_units;

        // splice it right before the current head
        let head = self.extras_head;
        let head_prev = self.extra(head).prev;
        self.extra_mut(src_num_units).prev = head_prev;
        self.extra_mut(dest_num_units - 1).next = head;
        self.extra_mut(head_prev).next = src_num_units;
        self.extra_mut(head).prev = dest_num_units - 1;
    }

    fn fix_all_blocks(&mut self) {
        let end = self.num_blocks();
        let begin = end.saturating_sub(NUM_EXTRA_BLOCKS);

        for block_id in begin..end {
            self.fix_block(block_id as u32);
        }
    }

    /// Finalizes a block: every still-unfixed slot is reserved and given
    /// a filler label chosen so that no navigation step can match it.
    fn fix_block(&mut self, block_id: u32) {
        let begin = block_id * BLOCK_SIZE as u32;
        let end = begin + BLOCK_SIZE as u32;

        let mut unused_offset = 0;
        for offset in begin..end {
            if !self.extra(offset).is_used {
                unused_offset = offset;
                break;
            }
        }

        for id in begin..end {
            if !self.extra(id).is_fixed {
                self.reserve_id(id);
                self.units[id as usize].set_label((id ^ unused_offset) as u8);
            }
        }
    }
}

impl Default for DoubleArrayBuilder {
    fn default() -> Self {
        DoubleArrayBuilder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dawg::DawgBuilder;
    use crate::trie::unit::DoubleArrayUnit;

    fn build_units(keys: &[(&[u8], i32)]) -> Vec<u32> {
        let mut dawg_builder = DawgBuilder::new();
        for &(key, value) in keys {
            dawg_builder.insert(key, value).expect("sorted input");
        }
        let dawg = dawg_builder.finish().expect("finish");

        let mut builder = DoubleArrayBuilder::new();
        builder.build(&dawg).expect("conversion");
        builder.into_units()
    }

    fn lookup(units: &[u32], key: &[u8]) -> Option<i32> {
        let mut node_pos = 0usize;
        let mut unit = DoubleArrayUnit::new(units[node_pos]);
        for &k in key {
            node_pos ^= unit.offset() as usize ^ k as usize;
            unit = DoubleArrayUnit::new(units[node_pos]);
            if unit.label() != k as u32 {
                return None;
            }
        }
        if !unit.has_leaf() {
            return None;
        }
        Some(DoubleArrayUnit::new(units[node_pos ^ unit.offset() as usize]).value())
    }

    #[test]
    fn array_size_is_block_aligned() {
        let units = build_units(&[(b"key", 1)]);
        assert!(!units.is_empty());
        assert_eq!(units.len() % BLOCK_SIZE, 0);
    }

    #[test]
    fn empty_dawg_builds_one_block() {
        let dawg = DawgBuilder::new().finish().expect("finish");
        let mut builder = DoubleArrayBuilder::new();
        builder.build(&dawg).expect("conversion");
        let units = builder.into_units();
        assert_eq!(units.len(), BLOCK_SIZE);
        assert!(lookup(&units, b"anything").is_none());
    }

    #[test]
    fn places_all_keys() {
        let keys: Vec<(&[u8], i32)> = vec![
            (b"a", 10),
            (b"ab", 20),
            (b"abc", 30),
            (b"b", 40),
            (b"bcd", 50),
        ];
        let units = build_units(&keys);
        for &(key, value) in &keys {
            assert_eq!(lookup(&units, key), Some(value), "key {:?}", key);
        }
        assert_eq!(lookup(&units, b"c"), None);
        assert_eq!(lookup(&units, b"abcd"), None);
    }

    #[test]
    fn reuses_shared_subtrees() {
        // same values force the suffix subtree to be shared in the DAWG
        // and reused through the intersection table here
        let keys: Vec<(&[u8], i32)> = vec![(b"ax", 9), (b"bx", 9), (b"cx", 9)];
        let units = build_units(&keys);
        for &(key, value) in &keys {
            assert_eq!(lookup(&units, key), Some(value));
        }
    }

    #[test]
    fn value_cells_carry_the_sign_bit() {
        let units = build_units(&[(b"ab", 1), (b"ac", 2), (b"b", 3)]);
        for (pos, &raw) in units.iter().enumerate() {
            if raw & (1 << 31) != 0 {
                continue;
            }
            let unit = DoubleArrayUnit::new(raw);
            if unit.has_leaf() {
                let value_pos = pos ^ unit.offset() as usize;
                assert_ne!(
                    units[value_pos] & (1 << 31),
                    0,
                    "unit {} points at a non-value cell",
                    pos
                );
            }
        }
    }

    #[test]
    fn window_eviction_keeps_keys_reachable() {
        // enough keys to grow past 16 blocks and recycle ring records
        let mut keys: Vec<(Vec<u8>, i32)> = Vec::new();
        let mut count = 0i32;
        for a in 1u8..=60 {
            for b in 1u8..=60 {
                keys.push((vec![a, b], count));
                count += 1;
            }
        }

        let mut dawg_builder = DawgBuilder::new();
        for (key, value) in &keys {
            dawg_builder.insert(key, *value).expect("sorted input");
        }
        let dawg = dawg_builder.finish().expect("finish");

        let mut builder = DoubleArrayBuilder::new();
        builder.build(&dawg).expect("conversion");
        let units = builder.into_units();
        assert!(units.len() > NUM_EXTRAS);

        for (key, value) in &keys {
            assert_eq!(lookup(&units, key), Some(*value), "key {:?}", key);
        }
    }
}
