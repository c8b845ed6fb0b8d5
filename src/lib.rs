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

//! Static double-array trie over byte-string keys.
//!
//! Keys are inserted in ascending order together with nonnegative `i32`
//! values, compressed into a minimal DAWG and packed into a flat array of
//! 32-bit units. The packed array answers exact-match, common-prefix and
//! resumable stepwise searches without any auxiliary state, and can be
//! dumped to or memory-mapped from a file as-is.
//!
//! ```
//! use darts_trie::trie::DoubleArray;
//!
//! let keys: Vec<&[u8]> = vec![b"bar", b"baz", b"foo"];
//! let trie = DoubleArray::build(&keys, None).unwrap();
//! assert_eq!(trie.exact_match(b"baz"), Some(1));
//! assert_eq!(trie.exact_match(b"qux"), None);
//! ```

pub mod bitvec;
pub mod dawg;
pub mod error;
mod hash;
pub mod trie;
mod util;

pub mod prelude {
    pub use crate::{
        error::{BuildError, DartsError, DartsResult},
        trie::{DoubleArray, TraverseResult, TrieEntry},
    };
}
