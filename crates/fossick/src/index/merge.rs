use crate::error::{Error, Result};
use crate::index::builder::IndexBuilder;
use crate::shard::IndexData;
use crate::types::Document;

/// Re-index every document of the given shards into one builder. Unlike
/// `convert`, this goes back through `add`, so posting lists, rune tables
/// and the bloom filter are rebuilt for the combined corpus.
pub fn merge(ds: &[&IndexData]) -> Result<IndexBuilder> {
    if ds.is_empty() {
        return Err(Error::Other("need 1 or more shards to merge".to_string()));
    }

    let mut ib = IndexBuilder::new(ds[0].repository().clone());
    for d in ds {
        for doc_id in 0..d.doc_count() {
            let (sym_start, sym_end) = (
                d.file_end_symbol[doc_id as usize] as usize,
                d.file_end_symbol[doc_id as usize + 1] as usize,
            );
            let doc = Document {
                name: d.file_name(doc_id),
                content: d.read_contents(doc_id)?,
                branches: d.doc_branches(doc_id),
                sub_repo_path: d.sub_repo_paths[d.sub_repos[doc_id as usize] as usize].clone(),
                language: d.language_name(doc_id).to_string(),
                symbols: (sym_start..sym_end).map(|i| d.symbol(i)).collect(),
            };
            ib.add(doc)?;
        }
    }
    Ok(ib)
}
