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

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::bloom::{Bloom, BLOOM_DEFAULT_LOAD};
use crate::error::{Error, Result};
use crate::shard::{
    rune_starts, strings_to_bytes, to_deltas, u16s_to_bytes, u32s_to_bytes, u64s_to_bytes,
    write_var_u32, IndexMetadata, IndexToc, SectionWriter, FORMAT_VERSION, MIN_READ_VERSION,
    RUNE_OFFSET_FREQUENCY,
};
use crate::types::{Document, Repository, Symbol};

/// Maximum content size accepted per document.
pub const MAX_DOC_SIZE: usize = 1 << 20;

/// A delta-encoded posting list, extended one ascending offset at a time.
/// Keeping the encoded form during building means converting an existing
/// shard can install the stored bytes directly.
#[derive(Debug, Default, Clone)]
pub(crate) struct PostingList {
    last: u32,
    pub(crate) bytes: Vec<u8>,
}

impl PostingList {
    fn push(&mut self, off: u32) {
        write_var_u32(&mut self.bytes, off.wrapping_sub(self.last));
        self.last = off;
    }

    pub(crate) fn from_raw(bytes: Vec<u8>) -> PostingList {
        PostingList { last: 0, bytes }
    }
}

/// Builds a single shard. Documents are added in priority order (earlier is
/// ranked higher), then `write` streams the shard to a sink.
pub struct IndexBuilder {
    pub(crate) repo: Repository,
    pub(crate) version: u32,
    pub(crate) index_time_millis: u64,
    pub(crate) plain_ascii: bool,

    // Case-folded content, one global case bit per byte.
    pub(crate) content_blob: Vec<u8>,
    pub(crate) content_case: Vec<u8>,
    pub(crate) content_bounds: Vec<u32>,
    pub(crate) rune_offsets: Vec<u32>,
    pub(crate) file_end_runes: Vec<u32>,
    rune_count: u32,

    pub(crate) name_blob: Vec<u8>,
    pub(crate) name_case: Vec<u8>,
    pub(crate) name_bounds: Vec<u32>,
    pub(crate) name_rune_offsets: Vec<u32>,
    pub(crate) name_end_runes: Vec<u32>,
    name_rune_count: u32,

    pub(crate) content_postings: BTreeMap<[u8; 3], PostingList>,
    // Name postings stay pre-delta in memory and are encoded at write time.
    pub(crate) name_postings: BTreeMap<[u8; 3], Vec<u32>>,

    pub(crate) doc_sections: Vec<Vec<u8>>,
    pub(crate) symbols_meta: Vec<u8>,
    pub(crate) symbols_blob: Vec<u8>,
    pub(crate) file_end_symbol: Vec<u32>,

    pub(crate) branch_masks: Vec<u64>,
    pub(crate) languages: Vec<u16>,
    pub(crate) language_map: BTreeMap<String, u16>,
    pub(crate) sub_repos: Vec<u32>,
    pub(crate) sub_repo_paths: Vec<String>,
    pub(crate) checksums: Vec<u8>,

    pub(crate) bloom: Bloom,
    // A frozen filter came out of an existing shard; it is written back
    // verbatim instead of being shrunk again.
    pub(crate) bloom_frozen: bool,

    written: bool,
}

impl IndexBuilder {
    pub fn new(repo: Repository) -> IndexBuilder {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        IndexBuilder {
            repo,
            version: FORMAT_VERSION,
            index_time_millis: now,
            plain_ascii: true,
            content_blob: Vec::new(),
            content_case: Vec::new(),
            content_bounds: vec![0],
            rune_offsets: Vec::new(),
            file_end_runes: Vec::new(),
            rune_count: 0,
            name_blob: Vec::new(),
            name_case: Vec::new(),
            name_bounds: vec![0],
            name_rune_offsets: Vec::new(),
            name_end_runes: Vec::new(),
            name_rune_count: 0,
            content_postings: BTreeMap::new(),
            name_postings: BTreeMap::new(),
            doc_sections: Vec::new(),
            symbols_meta: Vec::new(),
            symbols_blob: Vec::new(),
            file_end_symbol: vec![0],
            branch_masks: Vec::new(),
            languages: Vec::new(),
            language_map: BTreeMap::new(),
            sub_repos: Vec::new(),
            sub_repo_paths: vec![String::new()],
            checksums: Vec::new(),
            bloom: Bloom::empty(),
            bloom_frozen: false,
            written: false,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// Emit the shard in an older format version. Useful for round-tripping
    /// shards written by earlier releases without changing their layout.
    pub fn set_format_version(&mut self, version: u32) -> Result<()> {
        if !(MIN_READ_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(Error::BuilderRejected(format!(
                "unsupported format version {}",
                version
            )));
        }
        self.version = version;
        Ok(())
    }

    pub fn doc_count(&self) -> usize {
        self.content_bounds.len() - 1
    }

    /// Append a document. The first document added ranks highest in search
    /// results.
    pub fn add(&mut self, doc: Document) -> Result<()> {
        if self.written {
            return Err(Error::BuilderRejected(
                "document added after write".to_string(),
            ));
        }
        if doc.content.len() > MAX_DOC_SIZE {
            return Err(Error::BuilderRejected(format!(
                "document {:?} too large: {} > {}",
                doc.name,
                doc.content.len(),
                MAX_DOC_SIZE
            )));
        }
        let mut mask = 0u64;
        for b in &doc.branches {
            let idx = self
                .repo
                .branches
                .iter()
                .position(|rb| rb.name == *b)
                .ok_or_else(|| Error::BuilderRejected(format!("unknown branch {:?}", b)))?;
            mask |= 1 << idx;
        }

        let mut hasher = Sha256::new();
        hasher.update(&doc.content);
        self.checksums.extend(hasher.finalize());

        if !doc.content.is_ascii() || !doc.name.is_ascii() {
            self.plain_ascii = false;
        }

        // content
        let start = self.content_blob.len() as u32;
        append_folded(&mut self.content_blob, &mut self.content_case, &doc.content);
        for r in rune_starts(&doc.content) {
            if self.rune_count % RUNE_OFFSET_FREQUENCY == 0 {
                self.rune_offsets.push(start + r as u32);
            }
            self.rune_count += 1;
        }
        self.file_end_runes.push(self.rune_count);
        let folded = &self.content_blob[start as usize..];
        if folded.len() >= 3 {
            for i in 0..folded.len() - 2 {
                let tri = [folded[i], folded[i + 1], folded[i + 2]];
                self.content_postings
                    .entry(tri)
                    .or_default()
                    .push(start + i as u32);
            }
        }
        self.bloom.add_bytes(&doc.content);

        // file name
        let name_bytes = doc.name.as_bytes();
        let nstart = self.name_blob.len() as u32;
        append_folded(&mut self.name_blob, &mut self.name_case, name_bytes);
        for r in rune_starts(name_bytes) {
            if self.name_rune_count % RUNE_OFFSET_FREQUENCY == 0 {
                self.name_rune_offsets.push(nstart + r as u32);
            }
            self.name_rune_count += 1;
        }
        self.name_end_runes.push(self.name_rune_count);
        let nfolded = &self.name_blob[nstart as usize..];
        if nfolded.len() >= 3 {
            for i in 0..nfolded.len() - 2 {
                let tri = [nfolded[i], nfolded[i + 1], nfolded[i + 2]];
                self.name_postings
                    .entry(tri)
                    .or_default()
                    .push(nstart + i as u32);
            }
        }

        // symbol ranges, doc-relative
        let mut sec = Vec::with_capacity(doc.symbols.len() * 8);
        for s in &doc.symbols {
            sec.extend(&s.start.to_le_bytes());
            sec.extend(&(s.start + s.name.len() as u32).to_le_bytes());
        }
        self.doc_sections.push(sec);
        self.add_symbols(&doc.symbols);
        let prev = *self.file_end_symbol.last().unwrap();
        self.file_end_symbol.push(prev + doc.symbols.len() as u32);

        let next_lang = self.language_map.len() as u16;
        let lang_id = *self
            .language_map
            .entry(doc.language.clone())
            .or_insert(next_lang);
        self.languages.push(lang_id);

        let sub_id = match self
            .sub_repo_paths
            .iter()
            .position(|p| *p == doc.sub_repo_path)
        {
            Some(i) => i as u32,
            None => {
                self.sub_repo_paths.push(doc.sub_repo_path.clone());
                (self.sub_repo_paths.len() - 1) as u32
            }
        };
        self.sub_repos.push(sub_id);

        self.branch_masks.push(mask);
        self.content_bounds.push(self.content_blob.len() as u32);
        self.name_bounds.push(self.name_blob.len() as u32);
        Ok(())
    }

    /// Append symbols to the fixed-width metadata array and the name blob.
    /// 16 bytes per symbol: name offset, name length, start, line.
    pub(crate) fn add_symbols(&mut self, syms: &[Symbol]) {
        for s in syms {
            self.symbols_meta
                .extend(&(self.symbols_blob.len() as u32).to_le_bytes());
            self.symbols_meta
                .extend(&(s.name.len() as u32).to_le_bytes());
            self.symbols_meta.extend(&s.start.to_le_bytes());
            self.symbols_meta.extend(&s.line.to_le_bytes());
            self.symbols_blob.extend(s.name.as_bytes());
        }
    }

    /// Serialize the shard. Output is deterministic for a given builder
    /// state; sections stream in a fixed order with the TOC and footer last.
    pub fn write<W: Write>(&mut self, w: W) -> Result<()> {
        let start = Instant::now();
        self.written = true;

        let mut sw = SectionWriter::new(w)?;
        let mut toc = IndexToc::default();

        toc.file_contents = sw.simple(&self.content_blob)?;
        toc.content_case_bits = sw.simple(&self.content_case)?;
        toc.content_boundaries = sw.simple(&u32s_to_bytes(&self.content_bounds))?;
        toc.rune_offsets = sw.simple(&u32s_to_bytes(&self.rune_offsets))?;
        toc.file_end_runes = sw.simple(&u32s_to_bytes(&self.file_end_runes))?;

        toc.file_names = sw.simple(&self.name_blob)?;
        toc.name_case_bits = sw.simple(&self.name_case)?;
        toc.name_boundaries = sw.simple(&u32s_to_bytes(&self.name_bounds))?;
        toc.name_rune_offsets = sw.simple(&u32s_to_bytes(&self.name_rune_offsets))?;
        toc.name_end_runes = sw.simple(&u32s_to_bytes(&self.name_end_runes))?;

        toc.doc_sections = sw.compound(self.doc_sections.iter().map(|v| v.as_slice()))?;
        toc.symbols_meta = sw.simple(&self.symbols_meta)?;
        toc.symbols_blob = sw.simple(&self.symbols_blob)?;
        toc.file_end_symbol = sw.simple(&u32s_to_bytes(&self.file_end_symbol))?;

        toc.branch_masks = sw.simple(&u64s_to_bytes(&self.branch_masks))?;
        toc.languages = sw.simple(&u16s_to_bytes(&self.languages))?;
        toc.sub_repos = sw.simple(&u32s_to_bytes(&self.sub_repos))?;
        toc.sub_repo_paths = sw.simple(&strings_to_bytes(&self.sub_repo_paths))?;
        toc.checksums = sw.simple(&self.checksums)?;

        let mut keys = Vec::with_capacity(self.content_postings.len() * 3);
        for tri in self.content_postings.keys() {
            keys.extend_from_slice(tri);
        }
        toc.content_ngrams = sw.simple(&keys)?;
        toc.content_postings =
            sw.compound(self.content_postings.values().map(|p| p.bytes.as_slice()))?;

        let mut nkeys = Vec::with_capacity(self.name_postings.len() * 3);
        for tri in self.name_postings.keys() {
            nkeys.extend_from_slice(tri);
        }
        toc.name_ngrams = sw.simple(&nkeys)?;
        let name_deltas: Vec<Vec<u8>> = self
            .name_postings
            .values()
            .map(|offs| to_deltas(offs))
            .collect();
        toc.name_postings = sw.compound(name_deltas.iter().map(|v| v.as_slice()))?;

        if self.version >= 2 {
            let encoded = if self.bloom_frozen {
                self.bloom.encode()
            } else {
                self.bloom.shrink_to_load(BLOOM_DEFAULT_LOAD).encode()
            };
            toc.bloom = sw.simple(&encoded)?;
        }

        toc.repo_meta = sw.simple(&serde_json::to_vec(&self.repo)?)?;
        let md = IndexMetadata {
            format_version: self.version,
            index_time_millis: self.index_time_millis,
            plain_ascii: self.plain_ascii,
            language_map: self.language_map.clone(),
        };
        toc.metadata = sw.simple(&serde_json::to_vec(&md)?)?;

        sw.finish(&toc, self.version)?;
        tracing::debug!(
            docs = self.doc_count(),
            content_bytes = self.content_blob.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "wrote shard"
        );
        Ok(())
    }
}

/// Lowercase ASCII letters into `blob`, recording the original case in a
/// bit vector aligned with blob offsets.
fn append_folded(blob: &mut Vec<u8>, case_bits: &mut Vec<u8>, data: &[u8]) {
    let start = blob.len();
    case_bits.resize((start + data.len() + 7) / 8, 0);
    for (i, &b) in data.iter().enumerate() {
        if b.is_ascii_uppercase() {
            blob.push(b.to_ascii_lowercase());
            let bit = start + i;
            case_bits[bit / 8] |= 1 << (bit % 8);
        } else {
            blob.push(b);
        }
    }
}

/// Reapply recorded case bits to a folded slice. `start_bit` is the global
/// offset of `folded[0]`.
pub(crate) fn unfold(folded: &[u8], case_bits: &[u8], start_bit: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(folded.len());
    for (i, &b) in folded.iter().enumerate() {
        let bit = start_bit + i;
        let upper = case_bits
            .get(bit / 8)
            .map(|byte| byte & (1 << (bit % 8)) != 0)
            .unwrap_or(false);
        out.push(if upper { b.to_ascii_uppercase() } else { b });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_unfold_roundtrip() {
        let mut blob = Vec::new();
        let mut bits = Vec::new();
        append_folded(&mut blob, &mut bits, b"MiXed CASE_09");
        append_folded(&mut blob, &mut bits, b"Zebra");
        assert_eq!(&blob[..13], b"mixed case_09");
        assert_eq!(unfold(&blob[..13], &bits, 0), b"MiXed CASE_09");
        assert_eq!(unfold(&blob[13..], &bits, 13), b"Zebra");
    }

    #[test]
    fn add_after_write_is_rejected() {
        let mut b = IndexBuilder::new(Repository::default());
        b.add(Document {
            name: "a".to_string(),
            content: b"hello world content".to_vec(),
            ..Default::default()
        })
        .unwrap();
        let mut buf = Vec::new();
        b.write(&mut buf).unwrap();
        let err = b
            .add(Document {
                name: "b".to_string(),
                content: b"more".to_vec(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::BuilderRejected(_)));
    }

    #[test]
    fn oversize_document_is_rejected() {
        let mut b = IndexBuilder::new(Repository::default());
        let err = b
            .add(Document {
                name: "big".to_string(),
                content: vec![b'x'; MAX_DOC_SIZE + 1],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::BuilderRejected(_)));
    }

    #[test]
    fn undeclared_branch_is_rejected() {
        let mut b = IndexBuilder::new(Repository::default());
        let err = b
            .add(Document {
                name: "f".to_string(),
                content: b"content".to_vec(),
                branches: vec!["main".to_string()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::BuilderRejected(_)));
    }
}
