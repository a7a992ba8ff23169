use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;

use fossick::query::{self, Query, QueryType};
use fossick::types::{
    Context, ListOptions, RepoList, RepoStats, SearchOptions, SearchResult, Searcher, StreamEvent,
};
use fossick::{Error, Result};

/// Evaluates repo-typed sub-queries before handing the query to the
/// underlying searcher. They must be resolved up front: a repo-typed child
/// selects across shards, which shard-local execution cannot see.
pub struct TypeRepoSearcher<S: Searcher> {
    pub searcher: S,
}

impl<S: Searcher> TypeRepoSearcher<S> {
    pub fn new(searcher: S) -> Self {
        TypeRepoSearcher { searcher }
    }

    fn eval(&self, ctx: &Context, q: &Query) -> Result<Query> {
        let mut first_err: Option<Error> = None;
        let out = query::map(q.clone(), &mut |node| {
            if first_err.is_some() {
                return node;
            }
            let child = match node {
                Query::Type {
                    kind: QueryType::Repo,
                    child,
                } => child,
                other => return other,
            };
            match self.searcher.list(ctx, &child, &ListOptions::default()) {
                Ok(rl) => {
                    let set: BTreeSet<String> = rl
                        .repos
                        .iter()
                        .map(|e| e.repository.name.clone())
                        .collect();
                    Query::RepoSet(set)
                }
                Err(e) => {
                    first_err = Some(Error::Query(e.to_string()));
                    Query::Const(false)
                }
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

impl<S: Searcher> Searcher for TypeRepoSearcher<S> {
    fn search(&self, ctx: &Context, q: &Query, opts: &SearchOptions) -> Result<SearchResult> {
        let q = self.eval(ctx, q)?;
        self.searcher.search(ctx, &q, opts)
    }

    fn list(&self, ctx: &Context, q: &Query, opts: &ListOptions) -> Result<RepoList> {
        let q = self.eval(ctx, q)?;
        self.searcher.list(ctx, &q, opts)
    }

    fn stats(&self) -> Result<RepoStats> {
        self.searcher.stats()
    }

    fn close(&self) {
        self.searcher.close();
    }

    fn describe(&self) -> String {
        format!("type_repo_searcher({})", self.searcher.describe())
    }

    fn stream_search(
        &self,
        ctx: &Context,
        q: &Query,
        opts: &SearchOptions,
    ) -> Receiver<StreamEvent> {
        match self.eval(ctx, q) {
            Ok(q) => self.searcher.stream_search(ctx, &q, opts),
            Err(e) => {
                let (tx, rx) = std::sync::mpsc::channel();
                let _ = tx.send(StreamEvent::Error(e));
                rx
            }
        }
    }
}
