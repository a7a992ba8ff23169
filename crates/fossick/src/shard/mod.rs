//! Shard module: on-disk format constants, section kinds and the table of
//! contents, plus the writer, reader, and per-shard searcher.
//!
//! This file is intentionally small: heavy search logic lives in
//! `shard/searcher.rs` and byte-level helpers live in `shard/utils.rs`.

use anyhow::{bail, Result};

/// Shard format constants.
pub const MAGIC: u32 = u32::from_le_bytes(*b"FOSK");
/// Current on-disk format version. Version 2 added the bloom filter
/// section; version 1 shards remain readable and re-encodable.
pub const FORMAT_VERSION: u32 = 2;
pub const MIN_READ_VERSION: u32 = 1;
/// `magic | toc_off | toc_sz | version`, all u32 little-endian.
pub const FOOTER_LEN: usize = 16;

/// How often a rune's byte offset is sampled into the rune offset tables.
pub const RUNE_OFFSET_FREQUENCY: u32 = 100;

mod utils;
pub(crate) use utils::{
    bytes_to_strings, bytes_to_u16s, bytes_to_u32s, bytes_to_u64s, find_all, from_deltas,
    rune_starts, strings_to_bytes, to_deltas, u16s_to_bytes, u32s_to_bytes, u64s_to_bytes,
    write_var_u32,
};

mod writer;
pub(crate) use writer::SectionWriter;

mod reader;
pub use reader::{read_toc, IndexFile, MemIndexFile, MmapIndexFile};

mod searcher;
pub use searcher::{new_searcher, IndexData, IndexMetadata};

/// A contiguous blob within the shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleSection {
    pub off: u32,
    pub sz: u32,
}

/// A blob sliced into elements by an offsets array. Element `i` spans
/// `[offsets[i], offsets[i+1])` in absolute file coordinates; the last
/// element ends at `data.off + data.sz`. The offsets section holds `4 * N`
/// bytes of little-endian u32s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompoundSection {
    pub data: SimpleSection,
    pub offsets: SimpleSection,
}

/// A section reference as listed by the TOC. Lazy-compound sections share
/// the compound byte layout; the tag tells readers they may defer
/// materializing the elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Simple(SimpleSection),
    Compound(CompoundSection),
    LazyCompound(CompoundSection),
}

const TAG_SIMPLE: u8 = 0;
const TAG_COMPOUND: u8 = 1;
const TAG_LAZY_COMPOUND: u8 = 2;

/// The ordered record of every named section in a shard. Field order is the
/// write order and must not change within a format version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexToc {
    pub file_contents: SimpleSection,
    pub content_case_bits: SimpleSection,
    pub content_boundaries: SimpleSection,
    pub rune_offsets: SimpleSection,
    pub file_end_runes: SimpleSection,
    pub file_names: SimpleSection,
    pub name_case_bits: SimpleSection,
    pub name_boundaries: SimpleSection,
    pub name_rune_offsets: SimpleSection,
    pub name_end_runes: SimpleSection,
    pub doc_sections: CompoundSection,
    pub symbols_meta: SimpleSection,
    pub symbols_blob: SimpleSection,
    pub file_end_symbol: SimpleSection,
    pub branch_masks: SimpleSection,
    pub languages: SimpleSection,
    pub sub_repos: SimpleSection,
    pub sub_repo_paths: SimpleSection,
    pub checksums: SimpleSection,
    pub content_ngrams: SimpleSection,
    pub content_postings: CompoundSection,
    pub name_ngrams: SimpleSection,
    pub name_postings: CompoundSection,
    /// Absent (zero) in version 1 shards.
    pub bloom: SimpleSection,
    pub repo_meta: SimpleSection,
    pub metadata: SimpleSection,
}

impl IndexToc {
    /// The `(name, section)` list in on-disk order for `version`. Tests
    /// compare shards field-by-field through this list instead of poking at
    /// struct internals.
    pub fn sections(&self, version: u32) -> Vec<(&'static str, Section)> {
        let mut out = vec![
            ("file_contents", Section::Simple(self.file_contents)),
            ("content_case_bits", Section::Simple(self.content_case_bits)),
            (
                "content_boundaries",
                Section::Simple(self.content_boundaries),
            ),
            ("rune_offsets", Section::Simple(self.rune_offsets)),
            ("file_end_runes", Section::Simple(self.file_end_runes)),
            ("file_names", Section::Simple(self.file_names)),
            ("name_case_bits", Section::Simple(self.name_case_bits)),
            ("name_boundaries", Section::Simple(self.name_boundaries)),
            ("name_rune_offsets", Section::Simple(self.name_rune_offsets)),
            ("name_end_runes", Section::Simple(self.name_end_runes)),
            ("doc_sections", Section::Compound(self.doc_sections)),
            ("symbols_meta", Section::Simple(self.symbols_meta)),
            ("symbols_blob", Section::Simple(self.symbols_blob)),
            ("file_end_symbol", Section::Simple(self.file_end_symbol)),
            ("branch_masks", Section::Simple(self.branch_masks)),
            ("languages", Section::Simple(self.languages)),
            ("sub_repos", Section::Simple(self.sub_repos)),
            ("sub_repo_paths", Section::Simple(self.sub_repo_paths)),
            ("checksums", Section::Simple(self.checksums)),
            ("content_ngrams", Section::Simple(self.content_ngrams)),
            (
                "content_postings",
                Section::LazyCompound(self.content_postings),
            ),
            ("name_ngrams", Section::Simple(self.name_ngrams)),
            ("name_postings", Section::Compound(self.name_postings)),
        ];
        if version >= 2 {
            out.push(("bloom", Section::Simple(self.bloom)));
        }
        out.push(("repo_meta", Section::Simple(self.repo_meta)));
        out.push(("metadata", Section::Simple(self.metadata)));
        out
    }

    pub(crate) fn encode(&self, version: u32) -> Vec<u8> {
        let sections = self.sections(version);
        let mut out = Vec::new();
        out.extend(&(sections.len() as u32).to_le_bytes());
        for (_, sec) in sections {
            match sec {
                Section::Simple(s) => {
                    out.push(TAG_SIMPLE);
                    write_simple(&mut out, s);
                }
                Section::Compound(c) => {
                    out.push(TAG_COMPOUND);
                    write_simple(&mut out, c.data);
                    write_simple(&mut out, c.offsets);
                }
                Section::LazyCompound(c) => {
                    out.push(TAG_LAZY_COMPOUND);
                    write_simple(&mut out, c.data);
                    write_simple(&mut out, c.offsets);
                }
            }
        }
        out
    }

    pub(crate) fn decode(buf: &[u8], version: u32) -> Result<IndexToc> {
        let mut rd = TocReader { buf, pos: 0 };
        let mut toc = IndexToc::default();
        let expected = toc.sections(version).len();
        let count = rd.u32()? as usize;
        if count != expected {
            bail!("toc section count {} != expected {}", count, expected);
        }
        toc.file_contents = rd.simple()?;
        toc.content_case_bits = rd.simple()?;
        toc.content_boundaries = rd.simple()?;
        toc.rune_offsets = rd.simple()?;
        toc.file_end_runes = rd.simple()?;
        toc.file_names = rd.simple()?;
        toc.name_case_bits = rd.simple()?;
        toc.name_boundaries = rd.simple()?;
        toc.name_rune_offsets = rd.simple()?;
        toc.name_end_runes = rd.simple()?;
        toc.doc_sections = rd.compound(TAG_COMPOUND)?;
        toc.symbols_meta = rd.simple()?;
        toc.symbols_blob = rd.simple()?;
        toc.file_end_symbol = rd.simple()?;
        toc.branch_masks = rd.simple()?;
        toc.languages = rd.simple()?;
        toc.sub_repos = rd.simple()?;
        toc.sub_repo_paths = rd.simple()?;
        toc.checksums = rd.simple()?;
        toc.content_ngrams = rd.simple()?;
        toc.content_postings = rd.compound(TAG_LAZY_COMPOUND)?;
        toc.name_ngrams = rd.simple()?;
        toc.name_postings = rd.compound(TAG_COMPOUND)?;
        if version >= 2 {
            toc.bloom = rd.simple()?;
        }
        toc.repo_meta = rd.simple()?;
        toc.metadata = rd.simple()?;
        if rd.pos != buf.len() {
            bail!("trailing bytes after toc ({} of {})", rd.pos, buf.len());
        }
        Ok(toc)
    }
}

fn write_simple(out: &mut Vec<u8>, s: SimpleSection) {
    out.extend(&s.off.to_le_bytes());
    out.extend(&s.sz.to_le_bytes());
}

struct TocReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TocReader<'a> {
    fn u32(&mut self) -> Result<u32> {
        if self.pos + 4 > self.buf.len() {
            bail!("toc truncated at offset {}", self.pos);
        }
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn tag(&mut self, want: u8) -> Result<()> {
        if self.pos >= self.buf.len() {
            bail!("toc truncated at offset {}", self.pos);
        }
        let got = self.buf[self.pos];
        self.pos += 1;
        if got != want {
            bail!("toc section tag {} != expected {}", got, want);
        }
        Ok(())
    }

    fn simple(&mut self) -> Result<SimpleSection> {
        self.tag(TAG_SIMPLE)?;
        Ok(SimpleSection {
            off: self.u32()?,
            sz: self.u32()?,
        })
    }

    fn compound(&mut self, tag: u8) -> Result<CompoundSection> {
        self.tag(tag)?;
        Ok(CompoundSection {
            data: SimpleSection {
                off: self.u32()?,
                sz: self.u32()?,
            },
            offsets: SimpleSection {
                off: self.u32()?,
                sz: self.u32()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toc_encode_decode_roundtrip() {
        let mut toc = IndexToc::default();
        toc.file_contents = SimpleSection { off: 4, sz: 100 };
        toc.content_postings = CompoundSection {
            data: SimpleSection { off: 200, sz: 40 },
            offsets: SimpleSection { off: 240, sz: 8 },
        };
        for version in [1, 2] {
            let enc = toc.encode(version);
            let dec = IndexToc::decode(&enc, version).unwrap();
            assert_eq!(toc.sections(version), dec.sections(version));
        }
    }

    #[test]
    fn toc_decode_rejects_wrong_count() {
        let toc = IndexToc::default();
        let enc = toc.encode(1);
        // v1 encoding parsed as v2 must fail: the bloom section is missing.
        assert!(IndexToc::decode(&enc, 2).is_err());
    }
}
