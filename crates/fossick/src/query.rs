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

//! Boolean query trees consumed by searchers. Parsing a query string into a
//! tree is out of scope here; callers hand over an already-built tree.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// The child query selects repositories, not files. Must be resolved
    /// into a `RepoSet` before per-shard dispatch.
    Repo,
    /// Report matching files without line-level matches.
    FileName,
}

#[derive(Debug, Clone)]
pub enum Query {
    Substring {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
    },
    Regex {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Const(bool),
    /// Substring match on the repository name.
    Repo(String),
    /// Explicit set of repository names.
    RepoSet(BTreeSet<String>),
    Branch(String),
    Language(String),
    Type {
        kind: QueryType,
        child: Box<Query>,
    },
}

impl Query {
    pub fn substring(pattern: impl Into<String>) -> Query {
        Query::Substring {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
        }
    }

    pub fn repo_set<I, S>(names: I) -> Query
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::RepoSet(names.into_iter().map(Into::into).collect())
    }

    pub fn and(children: Vec<Query>) -> Query {
        Query::And(children)
    }

    pub fn or(children: Vec<Query>) -> Query {
        Query::Or(children)
    }
}

/// Apply `f` to every node of the tree, bottom-up: children are transformed
/// first, then the rebuilt node itself is handed to `f`.
pub fn map(q: Query, f: &mut impl FnMut(Query) -> Query) -> Query {
    let q = match q {
        Query::And(children) => Query::And(children.into_iter().map(|c| map(c, f)).collect()),
        Query::Or(children) => Query::Or(children.into_iter().map(|c| map(c, f)).collect()),
        Query::Not(child) => Query::Not(Box::new(map(*child, f))),
        Query::Type { kind, child } => Query::Type {
            kind,
            child: Box::new(map(*child, f)),
        },
        leaf => leaf,
    };
    f(q)
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Substring {
                pattern,
                case_sensitive,
                file_name,
            } => write!(
                f,
                "{}substr{}:{:?}",
                if *file_name { "file_" } else { "" },
                if *case_sensitive { "_cs" } else { "" },
                pattern
            ),
            Query::Regex {
                pattern,
                case_sensitive,
                file_name,
            } => write!(
                f,
                "{}regex{}:{:?}",
                if *file_name { "file_" } else { "" },
                if *case_sensitive { "_cs" } else { "" },
                pattern
            ),
            Query::And(cs) => {
                write!(f, "(and")?;
                for c in cs {
                    write!(f, " {}", c)?;
                }
                write!(f, ")")
            }
            Query::Or(cs) => {
                write!(f, "(or")?;
                for c in cs {
                    write!(f, " {}", c)?;
                }
                write!(f, ")")
            }
            Query::Not(c) => write!(f, "(not {})", c),
            Query::Const(v) => write!(f, "const:{}", v),
            Query::Repo(p) => write!(f, "repo:{:?}", p),
            Query::RepoSet(s) => write!(f, "reposet:{}", s.len()),
            Query::Branch(b) => write!(f, "branch:{:?}", b),
            Query::Language(l) => write!(f, "lang:{:?}", l),
            Query::Type { kind, child } => write!(f, "type:{:?}({})", kind, child),
        }
    }
}
