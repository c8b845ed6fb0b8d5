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

//! The packed double-array trie: construction entry point, queries and
//! persistence.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::iter::FusedIterator;
use std::path::Path;

use memmap2::Mmap;

use crate::dawg::DawgBuilder;
use crate::error::{DartsError, DartsResult};
use crate::trie::unit::DoubleArrayUnit;
use crate::util::cow_array::CowArray;

pub mod builder;
pub(crate) mod unit;

pub use builder::DoubleArrayBuilder;

const UNIT_SIZE: usize = std::mem::size_of::<u32>();

/// A single result of a common-prefix search.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TrieEntry {
    /// Value associated with the matched prefix
    pub value: i32,
    /// Length of the matched prefix in bytes
    pub end: usize,
}

impl TrieEntry {
    #[inline]
    pub fn new(value: i32, end: usize) -> TrieEntry {
        TrieEntry { value, end }
    }
}

/// Outcome of one [`DoubleArray::traverse`] step.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum TraverseResult {
    /// The consumed part of the key is stored with this value
    Value(i32),
    /// The consumed part of the key is a valid path but holds no value
    NoValue,
    /// The key stepped past a nonexistent edge
    DeadEnd,
}

/// Static trie over an array of packed 32-bit units.
///
/// The unit array is either owned (built or loaded) or borrowed from the
/// caller; queries never mutate it, so a shared instance can be searched
/// from multiple threads.
pub struct DoubleArray<'a> {
    array: CowArray<'a>,
    // keeps the mapping alive for arrays opened from a file
    _storage: Option<Mmap>,
}

impl std::fmt::Debug for DoubleArray<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleArray")
            .field("size", &self.size())
            .finish()
    }
}

impl DoubleArray<'static> {
    /// Builds the trie from keys in strictly ascending byte order.
    ///
    /// When `values` is given it must contain one value per key;
    /// otherwise each key receives its index as the value.
    pub fn build<K: AsRef<[u8]>>(keys: &[K], values: Option<&[i32]>) -> DartsResult<Self> {
        DoubleArray::build_with_progress(keys, values, |_, _| {})
    }

    /// Same as [`DoubleArray::build`], reporting progress as
    /// `(processed, total)` after each key and once more when the
    /// conversion is done.
    pub fn build_with_progress<K, F>(
        keys: &[K],
        values: Option<&[i32]>,
        mut progress: F,
    ) -> DartsResult<Self>
    where
        K: AsRef<[u8]>,
        F: FnMut(usize, usize),
    {
        let mut dawg_builder = DawgBuilder::new();
        for (i, key) in keys.iter().enumerate() {
            let value = match values {
                Some(values) => values[i],
                None => i as i32,
            };
            dawg_builder.insert(key.as_ref(), value)?;
            progress(i + 1, keys.len() + 1);
        }
        let dawg = dawg_builder.finish()?;

        let mut builder = DoubleArrayBuilder::new();
        builder.build(&dawg)?;
        drop(dawg);

        progress(keys.len() + 1, keys.len() + 1);

        Ok(DoubleArray::from_units(builder.into_units()))
    }

    /// Wraps an owned unit array, e.g. one produced by
    /// [`DoubleArrayBuilder::into_units`].
    pub fn from_units(units: Vec<u32>) -> Self {
        DoubleArray {
            array: CowArray::from_owned(units),
            _storage: None,
        }
    }

    /// Memory-maps a trie image. `size == 0` means "everything after
    /// `offset`"; the mapped region must be a whole number of units.
    pub fn open<P: AsRef<Path>>(path: P, offset: usize, size: usize) -> DartsResult<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| DartsError::io_ctx(e, "failed to open double-array"))?;
        let mapping = unsafe { Mmap::map(&file) }
            .map_err(|e| DartsError::io_ctx(e, "failed to map double-array"))?;

        let num_units = checked_unit_count(mapping.len(), offset, size)?;

        // the slice only lives as long as self, which also owns the mapping
        let bytes: &'static [u8] = unsafe { std::mem::transmute(&mapping[..]) };
        Ok(DoubleArray {
            array: CowArray::from_bytes(bytes, offset, num_units),
            _storage: Some(mapping),
        })
    }
}

impl<'a> DoubleArray<'a> {
    /// Borrows a trie image from a caller-provided buffer without
    /// copying (unless the buffer is misaligned for `u32`).
    pub fn from_bytes(data: &'a [u8], offset: usize, size: usize) -> DartsResult<DoubleArray<'a>> {
        let num_units = checked_unit_count(data.len(), offset, size)?;
        Ok(DoubleArray {
            array: CowArray::from_bytes(data, offset, num_units),
            _storage: None,
        })
    }

    /// Writes the raw little-endian image of the unit array.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DartsResult<()> {
        let file = File::create(path.as_ref())
            .map_err(|e| DartsError::io_ctx(e, "failed to create double-array file"))?;
        let mut writer = BufWriter::new(file);
        for &unit in self.array.iter() {
            writer.write_all(&unit.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of 32-bit units.
    pub fn size(&self) -> usize {
        self.array.len()
    }

    /// Size of one packed unit in bytes.
    pub fn unit_size(&self) -> usize {
        UNIT_SIZE
    }

    /// Size of the packed image in bytes.
    pub fn total_size(&self) -> usize {
        UNIT_SIZE * self.array.len()
    }

    pub fn units(&self) -> &[u32] {
        &self.array
    }

    #[inline(always)]
    fn unit(&self, index: usize) -> DoubleArrayUnit {
        debug_assert!(index < self.array.len());
        // UB if out of bounds
        // Should we panic in release builds here instead?
        // Safe version is not optimized away
        DoubleArrayUnit::new(*unsafe { self.array.get_unchecked(index) })
    }

    /// Looks up the value stored for exactly `key`.
    #[inline]
    pub fn exact_match(&self, key: &[u8]) -> Option<i32> {
        self.exact_match_at(key, 0)
    }

    /// Exact match starting from an arbitrary node, e.g. one saved by
    /// [`DoubleArray::traverse`].
    pub fn exact_match_at(&self, key: &[u8], mut node_pos: usize) -> Option<i32> {
        let mut unit = self.unit(node_pos);
        for &k in key {
            node_pos ^= unit.offset() as usize ^ k as usize;
            unit = self.unit(node_pos);
            if unit.label() != k as u32 {
                return None;
            }
        }

        if !unit.has_leaf() {
            return None;
        }
        Some(self.unit(node_pos ^ unit.offset() as usize).value())
    }

    /// Iterates over every prefix of `key` stored in the trie, shortest
    /// first.
    #[inline]
    pub fn common_prefix_iterator<'b>(&'b self, key: &'b [u8]) -> CommonPrefixIter<'b> {
        let unit = self.unit(0);
        CommonPrefixIter {
            trie: &self.array,
            node_pos: unit.offset() as usize,
            key,
            offset: 0,
        }
    }

    /// Fills `results` with at most `max_num_results` prefix matches and
    /// returns the total number of matches, which may be larger.
    pub fn common_prefix_search(
        &self,
        key: &[u8],
        results: &mut Vec<TrieEntry>,
        max_num_results: usize,
    ) -> usize {
        let mut num_results = 0;
        for entry in self.common_prefix_iterator(key) {
            if num_results < max_num_results {
                results.push(entry);
            }
            num_results += 1;
        }
        num_results
    }

    /// Steps through `key` from `key_pos`, updating `node_pos` to the
    /// last matched node. A traversal can be resumed by calling again
    /// with the saved `node_pos` and the rest of the key.
    pub fn traverse(
        &self,
        key: &[u8],
        node_pos: &mut usize,
        key_pos: &mut usize,
    ) -> TraverseResult {
        let mut id = *node_pos;
        let mut unit = self.unit(id);

        while *key_pos < key.len() {
            let k = key[*key_pos];
            id ^= unit.offset() as usize ^ k as usize;
            unit = self.unit(id);
            if unit.label() != k as u32 {
                return TraverseResult::DeadEnd;
            }
            *node_pos = id;
            *key_pos += 1;
        }

        if !unit.has_leaf() {
            return TraverseResult::NoValue;
        }
        TraverseResult::Value(self.unit(id ^ unit.offset() as usize).value())
    }
}

fn checked_unit_count(total: usize, offset: usize, size: usize) -> DartsResult<usize> {
    if offset > total {
        return Err(DartsError::InvalidRange(offset, total));
    }
    let size = if size == 0 { total - offset } else { size };
    if offset + size > total {
        return Err(DartsError::InvalidRange(offset, offset + size));
    }
    // a valid image holds at least the root unit
    if size == 0 || size % UNIT_SIZE != 0 {
        return Err(DartsError::InvalidArraySize(size));
    }
    Ok(size / UNIT_SIZE)
}

/// Iterator of [`DoubleArray::common_prefix_iterator`].
pub struct CommonPrefixIter<'a> {
    trie: &'a [u32],
    node_pos: usize,
    key: &'a [u8],
    offset: usize,
}

impl<'a> CommonPrefixIter<'a> {
    #[inline(always)]
    fn get(&self, index: usize) -> DoubleArrayUnit {
        debug_assert!(index < self.trie.len());
        // UB if out of bounds, see DoubleArray::unit
        DoubleArrayUnit::new(*unsafe { self.trie.get_unchecked(index) })
    }
}

impl<'a> Iterator for CommonPrefixIter<'a> {
    type Item = TrieEntry;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let mut node_pos = self.node_pos;

        for i in self.offset..self.key.len() {
            let k = self.key[i];
            node_pos ^= k as usize;
            let unit = self.get(node_pos);
            if unit.label() != k as u32 {
                return None;
            }

            node_pos ^= unit.offset() as usize;
            if unit.has_leaf() {
                let entry = TrieEntry::new(self.get(node_pos).value(), i + 1);
                self.offset = entry.end;
                self.node_pos = node_pos;
                return Some(entry);
            }
        }
        None
    }
}

impl FusedIterator for CommonPrefixIter<'_> {}
