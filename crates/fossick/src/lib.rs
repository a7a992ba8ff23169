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

//! Core of a trigram-based code search index: a bloom filter over word
//! fragments for shard pruning, an on-disk shard codec with a typed table
//! of contents, an index builder, and a per-shard searcher.
//!
//! Cross-shard aggregation (fan-out, priority scheduling, crash isolation)
//! lives in the companion `fossick-shards` crate.

pub mod bloom;
pub mod error;
pub mod index;
pub mod query;
pub mod shard;
pub mod types;

// Re-export the common surface for downstream callers that prefer a flat
// import.
pub use crate::error::{Error, Result};
pub use crate::index::{convert, merge, IndexBuilder};
pub use crate::shard::{
    new_searcher, read_toc, IndexData, IndexFile, IndexMetadata, MemIndexFile, MmapIndexFile,
};
pub use crate::types::{
    Context, Document, FileMatch, ListOptions, RepoList, RepoListEntry, RepoStats, Repository,
    RepositoryBranch, SearchOptions, SearchResult, Searcher, Stats, StreamEvent, Symbol,
};
