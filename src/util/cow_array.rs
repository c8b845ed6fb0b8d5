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

use std::ops::Deref;

/// Copy-on-read view of the trie unit array.
///
/// `slice` is always valid; `storage` is used in owned mode.
/// Unfortunately, `Cow<&[T]>` does not equal to `&[T]` in assembly:
/// See: https://rust.godbolt.org/z/r4a9efjqh
///
/// It implements Deref for `&[u32]`, so it can be used as a slice.
pub struct CowArray<'a> {
    slice: &'a [u32],
    _storage: Option<Vec<u32>>,
}

impl CowArray<'static> {
    /// Creates from the owned data
    pub fn from_owned<D: Into<Vec<u32>>>(data: D) -> Self {
        let data = data.into();
        let slice1: &[u32] = &data;
        let slice: &'static [u32] = unsafe { std::mem::transmute(slice1) };
        Self {
            _storage: Some(data),
            slice,
        }
    }
}

impl<'a> CowArray<'a> {
    /// Create the CowArray from bytes, reinterpreting bytes as `u32`.
    ///
    /// Original data may or not be aligned.
    /// In the non-aligned case, it makes a copy of the original data.
    pub fn from_bytes(data: &'a [u8], offset: usize, size: usize) -> Self {
        let align = std::mem::align_of::<u32>();

        let real_size = size * std::mem::size_of::<u32>();
        let real_slice = &data[offset..offset + real_size];
        let ptr = real_slice.as_ptr() as *const u32;
        if is_aligned(ptr as usize, align) {
            // SAFETY: ptr is aligned and any bit pattern is a valid u32
            let reslice = unsafe { std::slice::from_raw_parts(ptr, size) };
            Self {
                slice: reslice,
                _storage: None,
            }
        } else {
            let data = copy_of_bytes(real_slice);
            let slice_1: &[u32] = data.as_slice();
            // we need transmute to make correct lifetime
            // slice will always point to vector contents and it is impossible to have
            // self-referential types in Rust yet
            let slice: &'a [u32] = unsafe { std::mem::transmute(slice_1) };
            Self {
                _storage: Some(data),
                slice,
            }
        }
    }
}

impl<'a> Deref for CowArray<'a> {
    type Target = [u32];

    fn deref(&self) -> &Self::Target {
        self.slice
    }
}

fn is_aligned(offset: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    offset % alignment == 0
}

fn copy_of_bytes(data: &[u8]) -> Vec<u32> {
    let size_t = std::mem::size_of::<u32>();
    assert_eq!(data.len() % size_t, 0);
    let nelems = data.len() / size_t;
    let mut result = Vec::with_capacity(nelems);
    for i in (0..data.len()).step_by(size_t) {
        let sl = &data[i..i + size_t];
        result.push(u32::from_le_bytes(sl.try_into().unwrap()));
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_owned_derefs() {
        let arr = CowArray::from_owned(vec![1u32, 2, 3]);
        assert_eq!(&arr[..], &[1, 2, 3]);
    }

    #[test]
    fn from_bytes_le() {
        let bytes: Vec<u8> = vec![0x01, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x80];
        let arr = CowArray::from_bytes(&bytes, 0, 2);
        assert_eq!(&arr[..], &[1, 0x800000FF]);
    }

    #[test]
    fn from_bytes_unaligned() {
        // skipping one byte forces the copying path on aligned buffers
        let mut bytes: Vec<u8> = vec![0xAA];
        bytes.extend_from_slice(&42u32.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        let arr = CowArray::from_bytes(&bytes, 1, 2);
        assert_eq!(&arr[..], &[42, 7]);
    }

    #[test]
    fn from_bytes_with_offset() {
        let mut bytes: Vec<u8> = vec![0; 4];
        bytes.extend_from_slice(&99u32.to_le_bytes());
        let arr = CowArray::from_bytes(&bytes, 4, 1);
        assert_eq!(&arr[..], &[99]);
    }
}
