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

use std::collections::TryReserveError;
use thiserror::Error;

pub type DartsResult<T> = Result<T, DartsError>;

/// Darts error
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DartsError {
    #[error("{context}: {cause}")]
    Io {
        cause: std::io::Error,
        context: String,
    },

    #[error("invalid range: {0}..{1}")]
    InvalidRange(usize, usize),

    #[error("invalid unit array size {0}, must be a positive multiple of 4 bytes")]
    InvalidArraySize(usize),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl From<std::io::Error> for DartsError {
    fn from(e: std::io::Error) -> Self {
        DartsError::Io {
            cause: e,
            context: String::from("IO Error"),
        }
    }
}

impl DartsError {
    pub fn io_ctx<S: Into<String>>(e: std::io::Error, ctx: S) -> Self {
        DartsError::Io {
            cause: e,
            context: ctx.into(),
        }
    }
}

/// Hard error during trie construction. All of these abort the build;
/// the builder is consumed and no partial structure escapes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    #[error("failed to insert key: negative value")]
    NegativeValue,

    #[error("failed to insert key: zero-length key")]
    ZeroLengthKey,

    #[error("failed to insert key: wrong key order")]
    WrongKeyOrder,

    #[error("failed to modify unit: offset {0} is too large")]
    OffsetTooLarge(u32),

    #[error("failed to allocate memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
}
