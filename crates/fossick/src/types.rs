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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::query::Query;

/// A branch of a repository covered by a shard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryBranch {
    pub name: String,
    /// Commit the branch pointed at when the shard was built.
    pub version: String,
}

/// Metadata for the repository (or repositories) a shard covers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    /// Numeric id; 0 means "not assigned".
    pub id: u32,
    pub name: String,
    pub url: String,
    pub branches: Vec<RepositoryBranch>,
    /// Importance of the repository; higher ranked shards are searched first.
    pub rank: u16,
    pub has_symbols: bool,
}

impl Repository {
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.name.clone()).collect()
    }
}

/// A discovered symbol inside a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Byte offset where the symbol name starts in the document.
    pub start: u32,
    /// 1-based line number containing the symbol.
    pub line: u32,
}

/// A document fed to the index builder. Documents added earlier rank higher
/// in search results.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    /// Branches the document is present in; each must be declared on the
    /// repository passed to the builder.
    pub branches: Vec<String>,
    pub sub_repo_path: String,
    pub language: String,
    pub symbols: Vec<Symbol>,
}

/// One matched fragment inside a line or chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchFragment {
    /// Byte offset of the fragment within the document.
    pub offset: u32,
    /// Byte offset within the enclosing line/chunk content.
    pub line_offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineMatch {
    pub line: Vec<u8>,
    /// 1-based.
    pub line_number: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub fragments: Vec<MatchFragment>,
    /// True when this match is against the file name rather than content.
    pub file_name: bool,
}

/// A run of adjacent matching lines, returned when
/// `SearchOptions::chunk_matches` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMatch {
    pub content: Vec<u8>,
    /// 1-based line number of the first line in `content`.
    pub start_line: u32,
    /// Byte offset of `content` within the document.
    pub content_start: u32,
    pub ranges: Vec<MatchFragment>,
    pub file_name: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMatch {
    pub file_name: String,
    pub repository: String,
    pub repository_id: u32,
    pub doc_id: u32,
    pub score: f64,
    pub checksum: Vec<u8>,
    pub language: String,
    pub branches: Vec<String>,
    pub line_matches: Vec<LineMatch>,
    pub chunk_matches: Vec<ChunkMatch>,
    /// Entire document content; populated when `SearchOptions::whole` is set.
    pub content: Option<Vec<u8>>,
}

/// Counters accumulated across one search call. Fields are summed when
/// results from multiple shards are merged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    /// Number of matched fragments.
    pub match_count: u64,
    /// Number of files with at least one match.
    pub file_count: u64,
    /// Candidate documents inspected.
    pub files_considered: u64,
    /// Shards whose bloom filter ruled out the query.
    pub shards_skipped_filter: u64,
    /// Shard callbacks that aborted abnormally.
    pub crashes: u64,
    pub duration: Duration,
}

impl Stats {
    pub fn add(&mut self, o: &Stats) {
        self.match_count += o.match_count;
        self.file_count += o.file_count;
        self.files_considered += o.files_considered;
        self.shards_skipped_filter += o.shards_skipped_filter;
        self.crashes += o.crashes;
        self.duration += o.duration;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub files: Vec<FileMatch>,
    pub stats: Stats,
}

/// Aggregate size counters for the repositories behind a searcher.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoStats {
    pub repos: u64,
    pub shards: u64,
    pub documents: u64,
    pub index_bytes: u64,
    pub content_bytes: u64,
}

impl RepoStats {
    pub fn add(&mut self, o: &RepoStats) {
        self.repos += o.repos;
        self.shards += o.shards;
        self.documents += o.documents;
        self.index_bytes += o.index_bytes;
        self.content_bytes += o.content_bytes;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoListEntry {
    pub repository: Repository,
    pub stats: RepoStats,
}

/// Compact per-repository entry used when `ListOptions::minimal` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MinimalRepoListEntry {
    pub has_symbols: bool,
    pub branches: Vec<RepositoryBranch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoList {
    pub repos: Vec<RepoListEntry>,
    /// Populated instead of `repos` for repositories with a numeric id when
    /// a minimal listing was requested.
    pub minimal: HashMap<u32, MinimalRepoListEntry>,
    pub crashes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Aggregate match cap across shards; 0 means unlimited. Once reached,
    /// lower-priority shards are canceled.
    pub total_max_match_count: u32,
    /// Per-shard match cap; 0 means unlimited.
    pub shard_max_match_count: u32,
    /// Abort the search after this much wall time.
    pub max_wall_time: Option<Duration>,
    /// Return the entire file content with each match.
    pub whole: bool,
    /// Return `chunk_matches` instead of `line_matches`.
    pub chunk_matches: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Report repositories possessing a numeric id as minimal entries.
    pub minimal: bool,
}

/// Cancellation scope for a search. Cloning shares the cancel flag; child
/// contexts observe their parent's cancellation but not vice versa.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<CtxInner>,
}

#[derive(Default)]
struct CtxInner {
    done: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

impl Context {
    pub fn background() -> Self {
        Context::default()
    }

    /// A child context that is additionally canceled after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Context {
            inner: Arc::new(CtxInner {
                done: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
                parent: Some(self.clone()),
            }),
        }
    }

    /// A child context cancellable independently of its parent.
    pub fn child(&self) -> Self {
        Context {
            inner: Arc::new(CtxInner {
                done: AtomicBool::new(false),
                deadline: None,
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.done.store(true, Ordering::Relaxed);
    }

    pub fn is_done(&self) -> bool {
        if self.inner.done.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(d) = self.inner.deadline {
            if Instant::now() >= d {
                return true;
            }
        }
        match &self.inner.parent {
            Some(p) => p.is_done(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("done", &self.is_done())
            .finish()
    }
}

/// One event on a streaming search channel. The channel closing signals the
/// end of the stream.
#[derive(Debug)]
pub enum StreamEvent {
    Result(SearchResult),
    Error(crate::error::Error),
}

/// The core search surface. Implemented by per-shard searchers and by
/// aggregators that fan out over many of them.
pub trait Searcher: Send + Sync {
    fn search(&self, ctx: &Context, q: &Query, opts: &SearchOptions) -> Result<SearchResult>;

    fn list(&self, ctx: &Context, q: &Query, opts: &ListOptions) -> Result<RepoList>;

    fn stats(&self) -> Result<RepoStats>;

    /// Release resources backing the searcher. Dropping has the same effect;
    /// this exists so aggregators can close shards they no longer track.
    fn close(&self) {}

    /// Short human-readable identity, used in logs.
    fn describe(&self) -> String {
        "searcher".to_string()
    }

    /// Search delivering results over a channel. The default adapter runs
    /// the search synchronously and delivers a single event.
    fn stream_search(
        &self,
        ctx: &Context,
        q: &Query,
        opts: &SearchOptions,
    ) -> Receiver<StreamEvent> {
        let (tx, rx) = std::sync::mpsc::channel();
        let ev = match self.search(ctx, q, opts) {
            Ok(res) => StreamEvent::Result(res),
            Err(e) => StreamEvent::Error(e),
        };
        let _ = tx.send(ev);
        rx
    }
}
