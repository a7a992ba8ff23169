use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use super::reader::read_section;
use super::{
    bytes_to_strings, bytes_to_u16s, bytes_to_u32s, bytes_to_u64s, find_all, from_deltas,
    read_toc, CompoundSection, IndexFile, IndexToc, SimpleSection,
};
use crate::bloom::{Bloom, BLOOM_HASHERS};
use crate::error::{Error, Result};
use crate::index::builder::unfold;
use crate::query::{Query, QueryType};
use crate::types::{
    ChunkMatch, Context, FileMatch, LineMatch, ListOptions, MatchFragment, MinimalRepoListEntry,
    RepoList, RepoListEntry, RepoStats, Repository, SearchOptions, SearchResult, Searcher, Stats,
    Symbol,
};

/// Shard-level metadata persisted as JSON in the `metadata` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub index_time_millis: u64,
    pub plain_ascii: bool,
    pub language_map: BTreeMap<String, u16>,
}

/// A parsed shard ready for search. Owns the backing `IndexFile`; dropping
/// the searcher releases the file.
pub struct IndexData {
    file: Box<dyn IndexFile>,
    pub(crate) toc: IndexToc,
    pub(crate) version: u32,
    pub(crate) repository: Repository,
    pub(crate) metadata: IndexMetadata,

    pub(crate) content_bounds: Vec<u32>,
    pub(crate) content_case: Vec<u8>,
    pub(crate) rune_offsets: Vec<u32>,
    pub(crate) file_end_runes: Vec<u32>,

    pub(crate) name_blob: Vec<u8>,
    pub(crate) name_case: Vec<u8>,
    pub(crate) name_bounds: Vec<u32>,
    pub(crate) name_rune_offsets: Vec<u32>,
    pub(crate) name_end_runes: Vec<u32>,

    pub(crate) branch_masks: Vec<u64>,
    pub(crate) languages: Vec<u16>,
    lang_names: Vec<String>,
    pub(crate) sub_repos: Vec<u32>,
    pub(crate) sub_repo_paths: Vec<String>,
    pub(crate) checksums: Vec<u8>,

    pub(crate) file_end_symbol: Vec<u32>,
    symbols_meta: Vec<u8>,
    symbols_blob: Vec<u8>,
    pub(crate) doc_section_elems: Vec<SimpleSection>,

    /// Content trigram -> location of its delta-encoded posting bytes.
    pub(crate) ngrams: BTreeMap<[u8; 3], SimpleSection>,
    /// File-name trigrams are small; they are decoded up front and
    /// re-encoded on conversion.
    pub(crate) name_ngrams: BTreeMap<[u8; 3], Vec<u32>>,

    pub(crate) bloom: Option<Bloom>,

    posting_cache: Mutex<LruCache<[u8; 3], Arc<Vec<u32>>>>,
}

/// Parse a shard into a searcher.
pub fn new_searcher(file: Box<dyn IndexFile>) -> Result<IndexData> {
    let (toc, version) = read_toc(file.as_ref())?;
    IndexData::parse(file, toc, version)
}

fn inv(e: anyhow::Error) -> Error {
    Error::InvalidShard(format!("{:#}", e))
}

/// Split a compound section into its element locations.
fn compound_elements(
    file: &dyn IndexFile,
    sec: &CompoundSection,
) -> anyhow::Result<Vec<SimpleSection>> {
    let abs = bytes_to_u32s(&read_section(file, sec.offsets)?)?;
    let end = sec.data.off + sec.data.sz;
    let mut out = Vec::with_capacity(abs.len());
    for (i, &off) in abs.iter().enumerate() {
        let next = abs.get(i + 1).copied().unwrap_or(end);
        if next < off {
            anyhow::bail!("compound offsets not ascending at element {}", i);
        }
        out.push(SimpleSection {
            off,
            sz: next - off,
        });
    }
    Ok(out)
}

impl IndexData {
    fn parse(file: Box<dyn IndexFile>, toc: IndexToc, version: u32) -> Result<IndexData> {
        let f = file.as_ref();
        let content_bounds = bytes_to_u32s(&read_section(f, toc.content_boundaries).map_err(inv)?)
            .map_err(inv)?;
        let name_bounds =
            bytes_to_u32s(&read_section(f, toc.name_boundaries).map_err(inv)?).map_err(inv)?;
        if content_bounds.len() != name_bounds.len() || content_bounds.is_empty() {
            return Err(Error::InvalidShard(format!(
                "boundary tables disagree: {} content vs {} name entries",
                content_bounds.len(),
                name_bounds.len()
            )));
        }

        let metadata: IndexMetadata =
            serde_json::from_slice(&read_section(f, toc.metadata).map_err(inv)?)?;
        let repository: Repository =
            serde_json::from_slice(&read_section(f, toc.repo_meta).map_err(inv)?)?;

        let mut lang_names = vec![String::new(); metadata.language_map.len()];
        for (name, &id) in &metadata.language_map {
            if (id as usize) < lang_names.len() {
                lang_names[id as usize] = name.clone();
            }
        }

        let ngram_keys = read_section(f, toc.content_ngrams).map_err(inv)?;
        if ngram_keys.len() % 3 != 0 {
            return Err(Error::InvalidShard("ngram key section misaligned".into()));
        }
        let posting_elems = compound_elements(f, &toc.content_postings).map_err(inv)?;
        if posting_elems.len() != ngram_keys.len() / 3 {
            return Err(Error::InvalidShard(format!(
                "{} ngram keys vs {} posting lists",
                ngram_keys.len() / 3,
                posting_elems.len()
            )));
        }
        let mut ngrams = BTreeMap::new();
        for (chunk, sec) in ngram_keys.chunks_exact(3).zip(posting_elems) {
            ngrams.insert([chunk[0], chunk[1], chunk[2]], sec);
        }

        let name_keys = read_section(f, toc.name_ngrams).map_err(inv)?;
        if name_keys.len() % 3 != 0 {
            return Err(Error::InvalidShard(
                "name ngram key section misaligned".into(),
            ));
        }
        let name_elems = compound_elements(f, &toc.name_postings).map_err(inv)?;
        if name_elems.len() != name_keys.len() / 3 {
            return Err(Error::InvalidShard(format!(
                "{} name ngram keys vs {} posting lists",
                name_keys.len() / 3,
                name_elems.len()
            )));
        }
        let mut name_ngrams = BTreeMap::new();
        for (chunk, sec) in name_keys.chunks_exact(3).zip(name_elems) {
            let offsets = from_deltas(&read_section(f, sec).map_err(inv)?).map_err(inv)?;
            name_ngrams.insert([chunk[0], chunk[1], chunk[2]], offsets);
        }

        let bloom = if version >= 2 {
            Some(Bloom::decode(
                &read_section(f, toc.bloom).map_err(inv)?,
                BLOOM_HASHERS,
            )?)
        } else {
            None
        };

        let data = IndexData {
            version,
            repository,
            metadata,
            content_case: read_section(f, toc.content_case_bits).map_err(inv)?,
            rune_offsets: bytes_to_u32s(&read_section(f, toc.rune_offsets).map_err(inv)?)
                .map_err(inv)?,
            file_end_runes: bytes_to_u32s(&read_section(f, toc.file_end_runes).map_err(inv)?)
                .map_err(inv)?,
            name_blob: read_section(f, toc.file_names).map_err(inv)?,
            name_case: read_section(f, toc.name_case_bits).map_err(inv)?,
            name_rune_offsets: bytes_to_u32s(&read_section(f, toc.name_rune_offsets).map_err(inv)?)
                .map_err(inv)?,
            name_end_runes: bytes_to_u32s(&read_section(f, toc.name_end_runes).map_err(inv)?)
                .map_err(inv)?,
            branch_masks: bytes_to_u64s(&read_section(f, toc.branch_masks).map_err(inv)?)
                .map_err(inv)?,
            languages: bytes_to_u16s(&read_section(f, toc.languages).map_err(inv)?)
                .map_err(inv)?,
            lang_names,
            sub_repos: bytes_to_u32s(&read_section(f, toc.sub_repos).map_err(inv)?)
                .map_err(inv)?,
            sub_repo_paths: bytes_to_strings(&read_section(f, toc.sub_repo_paths).map_err(inv)?)
                .map_err(inv)?,
            checksums: read_section(f, toc.checksums).map_err(inv)?,
            file_end_symbol: bytes_to_u32s(&read_section(f, toc.file_end_symbol).map_err(inv)?)
                .map_err(inv)?,
            symbols_meta: read_section(f, toc.symbols_meta).map_err(inv)?,
            symbols_blob: read_section(f, toc.symbols_blob).map_err(inv)?,
            doc_section_elems: compound_elements(f, &toc.doc_sections).map_err(inv)?,
            ngrams,
            name_ngrams,
            bloom,
            posting_cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
            content_bounds,
            name_bounds,
            toc,
            file,
        };
        if data.doc_section_elems.len() != data.doc_count() as usize {
            return Err(Error::InvalidShard(format!(
                "{} doc section tables for {} documents",
                data.doc_section_elems.len(),
                data.doc_count()
            )));
        }
        Ok(data)
    }

    pub fn doc_count(&self) -> u32 {
        (self.content_bounds.len() - 1) as u32
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// Reconstruct a document's file name with its original case.
    pub fn file_name(&self, doc: u32) -> String {
        let (s, e) = (
            self.name_bounds[doc as usize] as usize,
            self.name_bounds[doc as usize + 1] as usize,
        );
        String::from_utf8_lossy(&unfold(&self.name_blob[s..e], &self.name_case, s)).into_owned()
    }

    /// Reconstruct a document's original content.
    pub fn read_contents(&self, doc: u32) -> Result<Vec<u8>> {
        let folded = self.folded_content(doc)?;
        Ok(unfold(
            &folded,
            &self.content_case,
            self.content_bounds[doc as usize] as usize,
        ))
    }

    fn folded_content(&self, doc: u32) -> Result<Vec<u8>> {
        let s = self.content_bounds[doc as usize];
        let e = self.content_bounds[doc as usize + 1];
        self.file
            .read(self.toc.file_contents.off + s, e - s)
            .map_err(inv)
    }

    pub fn checksum(&self, doc: u32) -> &[u8] {
        let s = doc as usize * 32;
        &self.checksums[s..s + 32]
    }

    /// Rune range `[start, end)` of a document in the shard's global rune
    /// numbering.
    pub fn doc_rune_bounds(&self, doc: u32) -> (u32, u32) {
        let start = if doc == 0 {
            0
        } else {
            self.file_end_runes[doc as usize - 1]
        };
        (start, self.file_end_runes[doc as usize])
    }

    pub fn language_name(&self, doc: u32) -> &str {
        self.lang_names
            .get(self.languages[doc as usize] as usize)
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn doc_branches(&self, doc: u32) -> Vec<String> {
        let mask = self.branch_masks[doc as usize];
        self.repository
            .branches
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1u64 << i) != 0)
            .map(|(_, b)| b.name.clone())
            .collect()
    }

    /// Symbols of one document, in insertion order.
    pub fn doc_symbols(&self, doc: u32) -> Vec<Symbol> {
        let start = self.file_end_symbol[doc as usize] as usize;
        let end = self.file_end_symbol[doc as usize + 1] as usize;
        (start..end).map(|i| self.symbol(i)).collect()
    }

    pub(crate) fn symbol_count(&self) -> usize {
        self.symbols_meta.len() / 16
    }

    pub(crate) fn symbol(&self, i: usize) -> Symbol {
        let m = &self.symbols_meta[i * 16..i * 16 + 16];
        let name_off = u32::from_le_bytes(m[0..4].try_into().unwrap()) as usize;
        let name_len = u32::from_le_bytes(m[4..8].try_into().unwrap()) as usize;
        let start = u32::from_le_bytes(m[8..12].try_into().unwrap());
        let line = u32::from_le_bytes(m[12..16].try_into().unwrap());
        Symbol {
            name: String::from_utf8_lossy(&self.symbols_blob[name_off..name_off + name_len])
                .into_owned(),
            start,
            line,
        }
    }

    pub(crate) fn read_section_blob(&self, sec: SimpleSection) -> Result<Vec<u8>> {
        read_section(self.file.as_ref(), sec).map_err(inv)
    }

    pub(crate) fn folded_content_blob(&self) -> Result<Vec<u8>> {
        self.read_section_blob(self.toc.file_contents)
    }

    fn posting_list(&self, tri: &[u8; 3]) -> Result<Arc<Vec<u32>>> {
        if let Some(hit) = self.posting_cache.lock().get(tri).cloned() {
            return Ok(hit);
        }
        let sec = match self.ngrams.get(tri) {
            Some(s) => *s,
            None => return Ok(Arc::new(Vec::new())),
        };
        let offsets = from_deltas(&self.read_section_blob(sec)?).map_err(inv)?;
        let arc = Arc::new(offsets);
        self.posting_cache.lock().put(*tri, arc.clone());
        Ok(arc)
    }
}

fn doc_for_offset(bounds: &[u32], off: u32) -> u32 {
    let i = bounds.partition_point(|&b| b <= off);
    (i - 1) as u32
}

/// One verified occurrence, doc-relative.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    offset: u32,
    length: u32,
    file_name: bool,
}

type Hits = HashMap<u32, Vec<Candidate>>;

/// Content substrings that must all be present for the query to match,
/// used against the shard's bloom filter.
fn required_content_substrings(q: &Query) -> Vec<&str> {
    match q {
        Query::Substring {
            pattern,
            file_name: false,
            ..
        } => vec![pattern.as_str()],
        Query::And(children) => children
            .iter()
            .flat_map(required_content_substrings)
            .collect(),
        Query::Type { child, .. } => required_content_substrings(child),
        _ => Vec::new(),
    }
}

/// Repo-level predicate evaluation; `None` means the node depends on file
/// contents and cannot rule the repository out.
fn eval_repo(q: &Query, repo: &Repository) -> Option<bool> {
    match q {
        Query::Const(v) => Some(*v),
        Query::Repo(p) => Some(repo.name.contains(p.as_str())),
        Query::RepoSet(s) => Some(s.contains(&repo.name)),
        Query::Branch(b) => Some(repo.branches.iter().any(|rb| rb.name == *b)),
        Query::Not(c) => eval_repo(c, repo).map(|v| !v),
        Query::And(cs) => {
            let mut all_known = true;
            for c in cs {
                match eval_repo(c, repo) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => all_known = false,
                }
            }
            if all_known {
                Some(true)
            } else {
                None
            }
        }
        Query::Or(cs) => {
            let mut all_known = true;
            for c in cs {
                match eval_repo(c, repo) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => all_known = false,
                }
            }
            if all_known {
                Some(false)
            } else {
                None
            }
        }
        Query::Type { child, .. } => eval_repo(child, repo),
        _ => None,
    }
}

pub(crate) fn matches_repo(q: &Query, repo: &Repository) -> bool {
    eval_repo(q, repo).unwrap_or(true)
}

impl IndexData {
    fn search_inner(
        &self,
        ctx: &Context,
        q: &Query,
        opts: &SearchOptions,
        stats: &mut Stats,
    ) -> Result<Vec<FileMatch>> {
        if ctx.is_done() {
            return Ok(Vec::new());
        }

        if let Some(bloom) = &self.bloom {
            for pat in required_content_substrings(q) {
                if !bloom.maybe_has_bytes(pat.as_bytes()) {
                    stats.shards_skipped_filter = 1;
                    return Ok(Vec::new());
                }
            }
        }

        let (q, file_names_only) = match q {
            Query::Type {
                kind: QueryType::FileName,
                child,
            } => (child.as_ref(), true),
            other => (other, false),
        };

        let mut hits: Hits = HashMap::new();
        let satisfied = self.eval(ctx, q, true, &mut hits, stats)?;

        let n = self.doc_count();
        let mut files = Vec::new();
        for doc in 0..n {
            if !satisfied[doc as usize] {
                continue;
            }
            if ctx.is_done() {
                break;
            }
            if opts.shard_max_match_count > 0
                && stats.match_count >= opts.shard_max_match_count as u64
            {
                break;
            }
            let mut cands = hits.remove(&doc).unwrap_or_default();
            cands.sort_by_key(|c| (!c.file_name, c.offset));
            if opts.shard_max_match_count > 0 {
                let budget = opts.shard_max_match_count as u64 - stats.match_count;
                cands.truncate(budget as usize);
            }
            let fm = self.build_file_match(doc, &cands, opts, file_names_only)?;
            stats.match_count += (cands.len() as u64).max(1);
            stats.file_count += 1;
            files.push(fm);
        }

        files.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(files)
    }

    fn build_file_match(
        &self,
        doc: u32,
        cands: &[Candidate],
        opts: &SearchOptions,
        file_names_only: bool,
    ) -> Result<FileMatch> {
        let name = self.file_name(doc);
        let n = self.doc_count() as f64;
        let content_cands: Vec<&Candidate> = cands.iter().filter(|c| !c.file_name).collect();
        let name_cands: Vec<&Candidate> = cands.iter().filter(|c| c.file_name).collect();

        let needs_content = opts.whole || (!file_names_only && !content_cands.is_empty());
        let content = if needs_content {
            Some(self.read_contents(doc)?)
        } else {
            None
        };

        let mut fm = FileMatch {
            file_name: name.clone(),
            repository: self.repository.name.clone(),
            repository_id: self.repository.id,
            doc_id: doc,
            checksum: self.checksum(doc).to_vec(),
            language: self.language_name(doc).to_string(),
            branches: self.doc_branches(doc),
            ..Default::default()
        };

        let mut score = 0.0;
        if !name_cands.is_empty() {
            score += 7000.0;
        }
        score += (content_cands.len().min(100) as f64) * 10.0;
        score += (n - doc as f64) / n;
        fm.score = score;

        if !file_names_only {
            let name_bytes = name.as_bytes();
            for c in &name_cands {
                let frag = MatchFragment {
                    offset: c.offset,
                    line_offset: c.offset,
                    length: c.length,
                };
                if opts.chunk_matches {
                    fm.chunk_matches.push(ChunkMatch {
                        content: name_bytes.to_vec(),
                        start_line: 0,
                        content_start: 0,
                        ranges: vec![frag],
                        file_name: true,
                    });
                } else {
                    fm.line_matches.push(LineMatch {
                        line: name_bytes.to_vec(),
                        line_number: 0,
                        line_start: 0,
                        line_end: name_bytes.len() as u32,
                        fragments: vec![frag],
                        file_name: true,
                    });
                }
            }

            if let Some(content) = content.as_deref() {
                if !content_cands.is_empty() {
                    let starts = line_starts(content);
                    if opts.chunk_matches {
                        fm.chunk_matches
                            .extend(build_chunks(content, &starts, &content_cands));
                    } else {
                        fm.line_matches
                            .extend(build_lines(content, &starts, &content_cands));
                    }
                }
            }
        }

        if opts.whole {
            fm.content = content;
        }
        Ok(fm)
    }

    fn eval(
        &self,
        ctx: &Context,
        q: &Query,
        positive: bool,
        hits: &mut Hits,
        stats: &mut Stats,
    ) -> Result<Vec<bool>> {
        let n = self.doc_count() as usize;
        match q {
            Query::Const(v) => Ok(vec![*v; n]),
            Query::Repo(p) => Ok(vec![self.repository.name.contains(p.as_str()); n]),
            Query::RepoSet(s) => Ok(vec![s.contains(&self.repository.name); n]),
            Query::Branch(b) => {
                let idx = self.repository.branches.iter().position(|rb| rb.name == *b);
                Ok(match idx {
                    Some(i) => self
                        .branch_masks
                        .iter()
                        .map(|m| m & (1u64 << i) != 0)
                        .collect(),
                    None => vec![false; n],
                })
            }
            Query::Language(l) => Ok(match self.metadata.language_map.get(l) {
                Some(&id) => self.languages.iter().map(|&x| x == id).collect(),
                None => vec![false; n],
            }),
            Query::Not(c) => {
                let inner = self.eval(ctx, c, false, hits, stats)?;
                Ok(inner.into_iter().map(|v| !v).collect())
            }
            Query::And(cs) => {
                let mut acc = vec![true; n];
                for c in cs {
                    let v = self.eval(ctx, c, positive, hits, stats)?;
                    for (a, b) in acc.iter_mut().zip(v) {
                        *a = *a && b;
                    }
                }
                Ok(acc)
            }
            Query::Or(cs) => {
                let mut acc = vec![false; n];
                for c in cs {
                    let v = self.eval(ctx, c, positive, hits, stats)?;
                    for (a, b) in acc.iter_mut().zip(v) {
                        *a = *a || b;
                    }
                }
                Ok(acc)
            }
            Query::Type { child, .. } => self.eval(ctx, child, positive, hits, stats),
            Query::Substring {
                pattern,
                case_sensitive,
                file_name,
            } => self.eval_substring(ctx, pattern, *case_sensitive, *file_name, positive, hits, stats),
            Query::Regex {
                pattern,
                case_sensitive,
                file_name,
            } => self.eval_regex(ctx, pattern, *case_sensitive, *file_name, positive, hits, stats),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_substring(
        &self,
        ctx: &Context,
        pattern: &str,
        case_sensitive: bool,
        file_name: bool,
        positive: bool,
        hits: &mut Hits,
        stats: &mut Stats,
    ) -> Result<Vec<bool>> {
        let n = self.doc_count() as usize;
        let pat = pattern.as_bytes();
        if pat.is_empty() {
            return Ok(vec![false; n]);
        }
        let folded_pat = pat.to_ascii_lowercase();

        // Candidate start offsets in the global folded byte space.
        let starts: Vec<u32> = if file_name {
            if folded_pat.len() >= 3 {
                match self.rarest_name_window(&folded_pat) {
                    Some((positions, idx)) => positions
                        .iter()
                        .filter_map(|&p| p.checked_sub(idx))
                        .collect(),
                    None => return Ok(vec![false; n]),
                }
            } else {
                find_all(&self.name_blob, &folded_pat)
                    .into_iter()
                    .map(|p| p as u32)
                    .collect()
            }
        } else if folded_pat.len() >= 3 {
            match self.rarest_content_window(&folded_pat)? {
                Some((positions, idx)) => positions
                    .iter()
                    .filter_map(|&p| p.checked_sub(idx))
                    .collect(),
                None => return Ok(vec![false; n]),
            }
        } else {
            // Too short for the trigram index; scan every document.
            let mut out = Vec::new();
            for doc in 0..self.doc_count() {
                if ctx.is_done() {
                    break;
                }
                let folded = self.folded_content(doc)?;
                let base = self.content_bounds[doc as usize];
                out.extend(find_all(&folded, &folded_pat).into_iter().map(|p| base + p as u32));
            }
            out
        };

        let bounds = if file_name {
            &self.name_bounds
        } else {
            &self.content_bounds
        };
        let total = *bounds.last().unwrap();

        let mut by_doc: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for s in starts {
            if s + folded_pat.len() as u32 > total {
                continue;
            }
            let doc = doc_for_offset(bounds, s);
            if s + folded_pat.len() as u32 > bounds[doc as usize + 1] {
                continue; // crosses a document boundary
            }
            by_doc.entry(doc).or_default().push(s);
        }

        let mut out = vec![false; n];
        for (doc, doc_starts) in by_doc {
            if ctx.is_done() {
                break;
            }
            stats.files_considered += 1;
            let base = bounds[doc as usize];
            let folded: Vec<u8>;
            let case_bits: &[u8];
            if file_name {
                folded =
                    self.name_blob[base as usize..bounds[doc as usize + 1] as usize].to_vec();
                case_bits = &self.name_case;
            } else {
                folded = self.folded_content(doc)?;
                case_bits = &self.content_case;
            }
            for s in doc_starts {
                let rel = (s - base) as usize;
                if folded[rel..rel + folded_pat.len()] != folded_pat[..] {
                    continue;
                }
                if case_sensitive {
                    let orig = unfold(
                        &folded[rel..rel + folded_pat.len()],
                        case_bits,
                        base as usize + rel,
                    );
                    if orig != pat {
                        continue;
                    }
                }
                out[doc as usize] = true;
                if positive {
                    hits.entry(doc).or_default().push(Candidate {
                        offset: rel as u32,
                        length: folded_pat.len() as u32,
                        file_name,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Pick the least frequent trigram window of the pattern to minimize
    /// verification work. Returns the decoded positions and the window's
    /// offset within the pattern; `None` when some window has no postings,
    /// which proves the pattern cannot occur.
    fn rarest_content_window(&self, folded_pat: &[u8]) -> Result<Option<(Arc<Vec<u32>>, u32)>> {
        let mut best: Option<([u8; 3], u32, u32)> = None;
        for (i, w) in folded_pat.windows(3).enumerate() {
            let tri = [w[0], w[1], w[2]];
            let sz = match self.ngrams.get(&tri) {
                Some(sec) => sec.sz,
                None => return Ok(None),
            };
            if best.map(|(_, _, bsz)| sz < bsz).unwrap_or(true) {
                best = Some((tri, i as u32, sz));
            }
        }
        let (tri, idx, _) = best.expect("pattern has at least one trigram window");
        Ok(Some((self.posting_list(&tri)?, idx)))
    }

    fn rarest_name_window(&self, folded_pat: &[u8]) -> Option<(&Vec<u32>, u32)> {
        let mut best: Option<(&Vec<u32>, u32)> = None;
        for (i, w) in folded_pat.windows(3).enumerate() {
            let tri = [w[0], w[1], w[2]];
            let list = self.name_ngrams.get(&tri)?;
            if best.map(|(b, _)| list.len() < b.len()).unwrap_or(true) {
                best = Some((list, i as u32));
            }
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_regex(
        &self,
        ctx: &Context,
        pattern: &str,
        case_sensitive: bool,
        file_name: bool,
        positive: bool,
        hits: &mut Hits,
        stats: &mut Stats,
    ) -> Result<Vec<bool>> {
        let n = self.doc_count() as usize;
        let expr = if case_sensitive {
            pattern.to_string()
        } else {
            format!("(?i:{})", pattern)
        };
        let re = regex::bytes::Regex::new(&expr)
            .map_err(|e| Error::Query(format!("bad regex {:?}: {}", pattern, e)))?;

        let mut out = vec![false; n];
        for doc in 0..self.doc_count() {
            if ctx.is_done() {
                break;
            }
            let haystack = if file_name {
                self.file_name(doc).into_bytes()
            } else {
                self.read_contents(doc)?
            };
            stats.files_considered += 1;
            for m in re.find_iter(&haystack) {
                out[doc as usize] = true;
                if positive {
                    hits.entry(doc).or_default().push(Candidate {
                        offset: m.start() as u32,
                        length: (m.end() - m.start()) as u32,
                        file_name,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn line_starts(content: &[u8]) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (i, &b) in content.iter().enumerate() {
        if b == b'\n' && i + 1 < content.len() {
            starts.push(i as u32 + 1);
        }
    }
    starts
}

fn line_for_offset(starts: &[u32], pos: u32) -> usize {
    starts.partition_point(|&s| s <= pos).saturating_sub(1)
}

fn line_bounds(starts: &[u32], line_idx: usize, file_len: usize) -> (usize, usize) {
    let beg = starts[line_idx] as usize;
    let end = if line_idx + 1 < starts.len() {
        starts[line_idx + 1] as usize
    } else {
        file_len
    };
    (beg, end)
}

fn trim_newline(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\n') => &line[..line.len() - 1],
        _ => line,
    }
}

fn build_lines(content: &[u8], starts: &[u32], cands: &[&Candidate]) -> Vec<LineMatch> {
    // group fragments per line
    let mut by_line: BTreeMap<usize, Vec<&Candidate>> = BTreeMap::new();
    for &c in cands {
        by_line
            .entry(line_for_offset(starts, c.offset))
            .or_default()
            .push(c);
    }
    let mut out = Vec::with_capacity(by_line.len());
    for (line_idx, cs) in by_line {
        let (beg, end) = line_bounds(starts, line_idx, content.len());
        let line = trim_newline(&content[beg..end]);
        out.push(LineMatch {
            line: line.to_vec(),
            line_number: line_idx as u32 + 1,
            line_start: beg as u32,
            line_end: beg as u32 + line.len() as u32,
            fragments: cs
                .iter()
                .map(|c| MatchFragment {
                    offset: c.offset,
                    line_offset: c.offset - beg as u32,
                    length: c.length,
                })
                .collect(),
            file_name: false,
        });
    }
    out
}

fn build_chunks(content: &[u8], starts: &[u32], cands: &[&Candidate]) -> Vec<ChunkMatch> {
    // group fragments into runs of adjacent lines
    let mut out: Vec<ChunkMatch> = Vec::new();
    let mut run: Vec<(usize, &Candidate)> = Vec::new();
    let flush = |run: &mut Vec<(usize, &Candidate)>, out: &mut Vec<ChunkMatch>| {
        if run.is_empty() {
            return;
        }
        let first_line = run[0].0;
        let last_line = run[run.len() - 1].0;
        let (beg, _) = line_bounds(starts, first_line, content.len());
        let (_, end) = line_bounds(starts, last_line, content.len());
        let chunk = trim_newline(&content[beg..end]);
        out.push(ChunkMatch {
            content: chunk.to_vec(),
            start_line: first_line as u32 + 1,
            content_start: beg as u32,
            ranges: run
                .iter()
                .map(|(_, c)| MatchFragment {
                    offset: c.offset,
                    line_offset: c.offset - beg as u32,
                    length: c.length,
                })
                .collect(),
            file_name: false,
        });
        run.clear();
    };
    for &c in cands {
        let line = line_for_offset(starts, c.offset);
        if let Some(&(prev_line, _)) = run.last() {
            if line > prev_line + 1 {
                flush(&mut run, &mut out);
            }
        }
        run.push((line, c));
    }
    flush(&mut run, &mut out);
    out
}

impl Searcher for IndexData {
    fn search(&self, ctx: &Context, q: &Query, opts: &SearchOptions) -> Result<SearchResult> {
        let start = Instant::now();
        let mut stats = Stats::default();
        let files = self.search_inner(ctx, q, opts, &mut stats)?;
        stats.duration = start.elapsed();
        Ok(SearchResult { files, stats })
    }

    fn list(&self, _ctx: &Context, q: &Query, opts: &ListOptions) -> Result<RepoList> {
        let mut list = RepoList::default();
        if !matches_repo(q, &self.repository) {
            return Ok(list);
        }
        if opts.minimal && self.repository.id > 0 {
            list.minimal.insert(
                self.repository.id,
                MinimalRepoListEntry {
                    has_symbols: self.repository.has_symbols,
                    branches: self.repository.branches.clone(),
                },
            );
        } else {
            list.repos.push(RepoListEntry {
                repository: self.repository.clone(),
                stats: self.shard_stats(),
            });
        }
        Ok(list)
    }

    fn stats(&self) -> Result<RepoStats> {
        let mut s = self.shard_stats();
        s.repos = 1;
        Ok(s)
    }

    fn describe(&self) -> String {
        self.file.name()
    }
}

impl IndexData {
    fn shard_stats(&self) -> RepoStats {
        RepoStats {
            repos: 0,
            shards: 1,
            documents: self.doc_count() as u64,
            index_bytes: self.file.size().unwrap_or(0) as u64,
            content_bytes: (*self.content_bounds.last().unwrap() as u64)
                + (*self.name_bounds.last().unwrap() as u64),
        }
    }
}
