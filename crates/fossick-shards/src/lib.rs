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

//! Cross-shard aggregation: a fan-out searcher over many independent
//! shards with priority scheduling, crash isolation and cancellation, plus
//! the query rewriter that resolves repo-typed sub-queries before dispatch.

mod priority;
mod rewrite;
mod sharded;

pub use priority::PrioritySlice;
pub use rewrite::TypeRepoSearcher;
pub use sharded::ShardedSearcher;
