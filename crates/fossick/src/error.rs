// Copyright 2026 Fossick Project
// Derived from google/zoekt (https://github.com/google/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error::Error as StdError;
use std::fmt::{self, Display};

/// Typed errors surfaced by the index core.
///
/// Shard crashes and cancellation are deliberately absent: a crashing shard
/// is counted in `Stats::crashes` and a canceled search returns partial
/// results, neither fails the call.
#[derive(Debug)]
pub enum Error {
    /// Underlying reader/writer failed.
    Io(std::io::Error),
    /// TOC/footer/magic parse failure or corrupted section data.
    InvalidShard(String),
    /// Bad bloom filter version or unknown hasher id.
    InvalidBloom(String),
    /// `add` after `write`, oversize document, undeclared branch.
    BuilderRejected(String),
    /// Query rewrite failure (e.g. an inner `list` errored).
    Query(String),
    /// Fallback for other textual errors.
    Other(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::InvalidShard(s) => write!(f, "invalid shard: {}", s),
            Error::InvalidBloom(s) => write!(f, "invalid bloom filter: {}", s),
            Error::BuilderRejected(s) => write!(f, "builder rejected: {}", s),
            Error::Query(s) => write!(f, "query error: {}", s),
            Error::Other(s) => write!(f, "error: {}", s),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<std::io::Error>() {
            Ok(io) => Error::Io(io),
            Err(e) => Error::Other(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidShard(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
