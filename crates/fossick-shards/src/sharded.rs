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

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use fossick::query::Query;
use fossick::types::{
    Context, ListOptions, MinimalRepoListEntry, RepoList, RepoListEntry, RepoStats, SearchOptions,
    SearchResult, Searcher, Stats, StreamEvent,
};
use fossick::{Error, Result};

use crate::priority::PrioritySlice;

/// A registered shard with the priority data the scheduler needs.
struct RankedShard {
    searcher: Arc<dyn Searcher>,
    rank: u16,
    repo_id: u32,
    repo_name: String,
}

struct Inner {
    parallelism: usize,
    shards: RwLock<HashMap<String, Arc<RankedShard>>>,
}

/// Fans a query out over many independent shards, merging partial results
/// with crash isolation, cancellation, and rank-based early termination.
/// Cloning is cheap and shares the shard set.
#[derive(Clone)]
pub struct ShardedSearcher {
    inner: Arc<Inner>,
}

impl ShardedSearcher {
    pub fn new(parallelism: usize) -> ShardedSearcher {
        ShardedSearcher {
            inner: Arc::new(Inner {
                parallelism: parallelism.max(1),
                shards: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// One worker per available core.
    pub fn with_default_parallelism() -> ShardedSearcher {
        let p = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        ShardedSearcher::new(p)
    }

    /// Install or swap a shard under `key`. The shard's own repository
    /// listing supplies its rank and identity; a shard that cannot list
    /// gets rank 0.
    pub fn replace(&self, key: &str, searcher: Arc<dyn Searcher>) {
        // The rank probe runs against the incoming shard; a shard that
        // panics or errors here still registers, at rank 0.
        let probed = catch_unwind(AssertUnwindSafe(|| {
            searcher.list(
                &Context::background(),
                &Query::Const(true),
                &ListOptions::default(),
            )
        }));
        let (rank, repo_id, repo_name) = match probed {
            Ok(Ok(rl)) => rl
                .repos
                .first()
                .map(|e| {
                    (
                        e.repository.rank,
                        e.repository.id,
                        e.repository.name.clone(),
                    )
                })
                .unwrap_or((0, 0, String::new())),
            _ => (0, 0, String::new()),
        };
        let shard = Arc::new(RankedShard {
            searcher,
            rank,
            repo_id,
            repo_name,
        });
        let old = self.inner.shards.write().insert(key.to_string(), shard);
        if let Some(old) = old {
            old.searcher.close();
        }
    }

    /// Drop the shard under `key`, closing it.
    pub fn remove(&self, key: &str) {
        let old = self.inner.shards.write().remove(key);
        if let Some(old) = old {
            old.searcher.close();
        }
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.read().len()
    }

    /// Snapshot the shard set, highest rank first so important shards are
    /// dispatched before the match budget runs out.
    fn ranked_snapshot(&self) -> Vec<(String, Arc<RankedShard>)> {
        let mut out: Vec<(String, Arc<RankedShard>)> = self
            .inner
            .shards
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| b.1.rank.cmp(&a.1.rank).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Run the query on every shard through a bounded worker pool.
    /// `deliver` sees each completed shard's result with its dispatch slot.
    /// Crashed shards deliver an empty result with `stats.crashes = 1`;
    /// the first hard error cancels the remainder and is returned.
    fn fan_out_search(
        &self,
        ctx: &Context,
        q: &Query,
        opts: &SearchOptions,
        deliver: &(dyn Fn(usize, SearchResult) + Sync),
    ) -> Result<()> {
        let shards = self.ranked_snapshot();
        if shards.is_empty() {
            return Ok(());
        }
        let child = match opts.max_wall_time {
            Some(d) => ctx.with_timeout(d),
            None => ctx.child(),
        };

        struct AggState {
            priority: PrioritySlice,
            completed: Vec<(f64, u64)>,
            first_err: Option<Error>,
        }
        let state = Mutex::new(AggState {
            priority: PrioritySlice::new(),
            completed: Vec::new(),
            first_err: None,
        });
        let cursor = AtomicUsize::new(0);
        let n = shards.len();
        let workers = self.inner.parallelism.min(n);

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::SeqCst);
                    if i >= n {
                        break;
                    }
                    let (key, shard) = &shards[i];
                    let rank = shard.rank as f64;
                    state.lock().priority.append(rank);

                    let outcome = if child.is_done() {
                        Ok(SearchResult::default())
                    } else {
                        match catch_unwind(AssertUnwindSafe(|| {
                            shard.searcher.search(&child, q, opts)
                        })) {
                            Ok(r) => r,
                            Err(_) => {
                                tracing::error!(shard = key.as_str(), "shard search crashed");
                                Ok(SearchResult {
                                    stats: Stats {
                                        crashes: 1,
                                        ..Stats::default()
                                    },
                                    ..SearchResult::default()
                                })
                            }
                        }
                    };

                    let mut st = state.lock();
                    st.priority.remove(rank);
                    match outcome {
                        Ok(res) => {
                            st.completed.push((rank, res.stats.match_count));
                            if opts.total_max_match_count > 0 {
                                // Only shards at least as important as
                                // everything still running may spend the
                                // budget; otherwise a flood of low-rank
                                // matches would cancel high-rank shards.
                                let max_running = st.priority.max();
                                let spent: u64 = st
                                    .completed
                                    .iter()
                                    .filter(|(r, _)| *r >= max_running)
                                    .map(|(_, m)| m)
                                    .sum();
                                if spent >= opts.total_max_match_count as u64 {
                                    tracing::debug!(
                                        spent,
                                        cap = opts.total_max_match_count,
                                        "match budget reached, canceling lower-priority shards"
                                    );
                                    child.cancel();
                                }
                            }
                            drop(st);
                            deliver(i, res);
                        }
                        Err(e) => {
                            if st.first_err.is_none() {
                                st.first_err = Some(e);
                            }
                            child.cancel();
                        }
                    }
                });
            }
        });

        match state.into_inner().first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stream_into(&self, ctx: &Context, q: &Query, opts: &SearchOptions, tx: Sender<StreamEvent>) {
        let res = self.fan_out_search(ctx, q, opts, &|_slot, res| {
            let _ = tx.send(StreamEvent::Result(res));
        });
        if let Err(e) = res {
            let _ = tx.send(StreamEvent::Error(e));
        }
    }
}

impl Searcher for ShardedSearcher {
    fn search(&self, ctx: &Context, q: &Query, opts: &SearchOptions) -> Result<SearchResult> {
        let start = Instant::now();
        let n = self.shard_count();
        let results: Mutex<Vec<Option<SearchResult>>> = Mutex::new(Vec::new());
        results.lock().resize_with(n, || None);
        self.fan_out_search(ctx, q, opts, &|slot, res| {
            let mut guard = results.lock();
            if slot >= guard.len() {
                guard.resize_with(slot + 1, || None);
            }
            guard[slot] = Some(res);
        })?;

        // Merge in dispatch (rank) order so equal scores keep shard-rank
        // order under the stable sort below.
        let mut agg = SearchResult::default();
        for res in results.into_inner().into_iter().flatten() {
            agg.files.extend(res.files);
            agg.stats.add(&res.stats);
        }
        agg.files.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        agg.stats.duration = start.elapsed();
        Ok(agg)
    }

    fn list(&self, ctx: &Context, q: &Query, opts: &ListOptions) -> Result<RepoList> {
        let shards = self.ranked_snapshot();
        let n = shards.len();
        let results: Mutex<Vec<Option<RepoList>>> = Mutex::new(Vec::new());
        results.lock().resize_with(n, || None);
        let crashes = AtomicUsize::new(0);
        let first_err: Mutex<Option<Error>> = Mutex::new(None);
        let cursor = AtomicUsize::new(0);
        let workers = self.inner.parallelism.min(n.max(1));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::SeqCst);
                    if i >= n {
                        break;
                    }
                    let (key, shard) = &shards[i];
                    match catch_unwind(AssertUnwindSafe(|| shard.searcher.list(ctx, q, opts))) {
                        Ok(Ok(rl)) => results.lock()[i] = Some(rl),
                        Ok(Err(e)) => {
                            let mut guard = first_err.lock();
                            if guard.is_none() {
                                *guard = Some(e);
                            }
                        }
                        Err(_) => {
                            tracing::error!(shard = key.as_str(), "shard list crashed");
                            crashes.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        if let Some(e) = first_err.into_inner() {
            return Err(e);
        }

        // Deduplicate by repository identity: numeric id when assigned,
        // name otherwise. Shard counts per repository are summed.
        let mut by_id: HashMap<u32, RepoListEntry> = HashMap::new();
        let mut by_name: HashMap<String, RepoListEntry> = HashMap::new();
        let mut minimal: HashMap<u32, MinimalRepoListEntry> = HashMap::new();
        for rl in results.into_inner().into_iter().flatten() {
            for e in rl.repos {
                if e.repository.id > 0 {
                    match by_id.entry(e.repository.id) {
                        std::collections::hash_map::Entry::Occupied(mut o) => {
                            o.get_mut().stats.add(&e.stats)
                        }
                        std::collections::hash_map::Entry::Vacant(v) => {
                            v.insert(e);
                        }
                    }
                } else {
                    match by_name.entry(e.repository.name.clone()) {
                        std::collections::hash_map::Entry::Occupied(mut o) => {
                            o.get_mut().stats.add(&e.stats)
                        }
                        std::collections::hash_map::Entry::Vacant(v) => {
                            v.insert(e);
                        }
                    }
                }
            }
            minimal.extend(rl.minimal);
        }

        let mut out = RepoList {
            crashes: crashes.load(Ordering::SeqCst) as u64,
            minimal,
            ..RepoList::default()
        };
        for e in by_id.into_values().chain(by_name.into_values()) {
            if opts.minimal && e.repository.id > 0 {
                out.minimal.insert(
                    e.repository.id,
                    MinimalRepoListEntry {
                        has_symbols: e.repository.has_symbols,
                        branches: e.repository.branches.clone(),
                    },
                );
            } else {
                out.repos.push(e);
            }
        }
        out.repos
            .sort_by(|a, b| a.repository.name.cmp(&b.repository.name));
        Ok(out)
    }

    fn stats(&self) -> Result<RepoStats> {
        let shards = self.ranked_snapshot();
        let mut agg = RepoStats::default();
        for (_, shard) in shards {
            if let Ok(s) = shard.searcher.stats() {
                agg.add(&s);
            }
        }
        Ok(agg)
    }

    fn close(&self) {
        let drained: Vec<_> = self.inner.shards.write().drain().collect();
        for (_, shard) in drained {
            shard.searcher.close();
        }
    }

    fn describe(&self) -> String {
        format!("sharded_searcher({} shards)", self.shard_count())
    }

    fn stream_search(
        &self,
        ctx: &Context,
        q: &Query,
        opts: &SearchOptions,
    ) -> Receiver<StreamEvent> {
        let (tx, rx) = channel();
        let this = self.clone();
        let ctx = ctx.clone();
        let q = q.clone();
        let opts = opts.clone();
        thread::spawn(move || this.stream_into(&ctx, &q, &opts, tx));
        rx
    }
}

// Repo identity/rank fields are read by the scheduler only; expose them for
// diagnostics.
impl ShardedSearcher {
    pub fn shard_info(&self, key: &str) -> Option<(u16, u32, String)> {
        self.inner
            .shards
            .read()
            .get(key)
            .map(|s| (s.rank, s.repo_id, s.repo_name.clone()))
    }
}
