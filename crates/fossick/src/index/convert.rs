use crate::error::Result;
use crate::index::builder::{IndexBuilder, PostingList};
use crate::shard::IndexData;

/// Create the equivalent `IndexBuilder` for a parsed shard. Writing the
/// builder out reproduces the source shard byte for byte, provided the
/// shard's index time and format version are carried over (which this does).
///
/// This function is a stepping stone to merging.
pub fn convert(d: &IndexData) -> Result<IndexBuilder> {
    let mut ib = IndexBuilder::new(d.repository().clone());
    ib.version = d.version;
    ib.index_time_millis = d.metadata.index_time_millis;
    ib.plain_ascii = d.metadata.plain_ascii;
    ib.language_map = d.metadata.language_map.clone();

    ib.content_blob = d.folded_content_blob()?;
    ib.content_case = d.content_case.clone();
    ib.content_bounds = d.content_bounds.clone();
    ib.rune_offsets = d.rune_offsets.clone();
    ib.file_end_runes = d.file_end_runes.clone();

    ib.name_blob = d.name_blob.clone();
    ib.name_case = d.name_case.clone();
    ib.name_bounds = d.name_bounds.clone();
    ib.name_rune_offsets = d.name_rune_offsets.clone();
    ib.name_end_runes = d.name_end_runes.clone();

    // Content posting bytes are copied directly; no decode/re-encode of the
    // deltas.
    for (tri, sec) in &d.ngrams {
        ib.content_postings
            .insert(*tri, PostingList::from_raw(d.read_section_blob(*sec)?));
    }
    // Name n-grams are held pre-delta in memory and re-encoded at write
    // time.
    for (tri, offsets) in &d.name_ngrams {
        ib.name_postings.insert(*tri, offsets.clone());
    }

    // Per-document section tables are offset-relative to their document, so
    // the stored bytes transfer without unmarshal/marshal.
    ib.doc_sections = Vec::with_capacity(d.doc_count() as usize);
    for doc in 0..d.doc_count() {
        ib.doc_sections
            .push(d.read_section_blob(d.doc_section_elems[doc as usize])?);
    }

    ib.checksums = d.checksums.clone();
    ib.languages = d.languages.clone();
    ib.sub_repos = d.sub_repos.clone();
    ib.sub_repo_paths = d.sub_repo_paths.clone();
    ib.branch_masks = d.branch_masks.clone();
    ib.file_end_symbol = d.file_end_symbol.clone();

    // Symbols data is tricky: re-insert them one at a time so count and
    // order survive.
    for i in 0..d.symbol_count() {
        let sym = d.symbol(i);
        ib.add_symbols(std::slice::from_ref(&sym));
    }

    if let Some(bloom) = &d.bloom {
        ib.bloom = bloom.clone();
        ib.bloom_frozen = true;
    }

    Ok(ib)
}
