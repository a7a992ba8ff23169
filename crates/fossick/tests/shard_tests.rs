use anyhow::Result;

use fossick::query::Query;
use fossick::types::{
    Context, Document, ListOptions, Repository, RepositoryBranch, SearchOptions, Searcher, Symbol,
};
use fossick::{new_searcher, IndexBuilder, IndexData, MemIndexFile, MmapIndexFile};

fn branch(name: &str) -> RepositoryBranch {
    RepositoryBranch {
        name: name.to_string(),
        version: "deadbeef".to_string(),
    }
}

fn test_repo() -> Repository {
    Repository {
        id: 77,
        name: "testrepo".to_string(),
        url: "https://example.com/testrepo".to_string(),
        branches: vec![branch("main"), branch("dev")],
        rank: 5,
        has_symbols: true,
    }
}

fn build_test_shard() -> Result<IndexData> {
    let mut b = IndexBuilder::new(test_repo());
    b.add(Document {
        name: "src/main.rs".to_string(),
        content: b"fn main() {\n    println!(\"Hello World\");\n}\n".to_vec(),
        branches: vec!["main".to_string()],
        language: "Rust".to_string(),
        symbols: vec![Symbol {
            name: "main".to_string(),
            start: 3,
            line: 1,
        }],
        ..Default::default()
    })?;
    b.add(Document {
        name: "lib/util.rs".to_string(),
        content: b"pub fn helper() -> u32 {\n    42\n}\n".to_vec(),
        branches: vec!["main".to_string(), "dev".to_string()],
        language: "Rust".to_string(),
        symbols: vec![Symbol {
            name: "helper".to_string(),
            start: 7,
            line: 1,
        }],
        ..Default::default()
    })?;
    b.add(Document {
        name: "README.md".to_string(),
        content: b"Hello documentation\nwith several hello lines\nbye\nhello again".to_vec(),
        branches: vec!["dev".to_string()],
        language: "Markdown".to_string(),
        ..Default::default()
    })?;
    let mut buf = Vec::new();
    b.write(&mut buf)?;
    Ok(new_searcher(Box::new(MemIndexFile::new(buf)))?)
}

#[test]
fn substring_case_insensitive() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::substring("hello"),
        &SearchOptions::default(),
    )?;
    let names: Vec<&str> = res.files.iter().map(|f| f.file_name.as_str()).collect();
    assert!(names.contains(&"src/main.rs"));
    assert!(names.contains(&"README.md"));
    assert_eq!(res.files.len(), 2);

    let readme = res
        .files
        .iter()
        .find(|f| f.file_name == "README.md")
        .unwrap();
    let lines: Vec<u32> = readme.line_matches.iter().map(|l| l.line_number).collect();
    assert_eq!(lines, vec![1, 2, 4]);
    assert_eq!(readme.line_matches[0].line, b"Hello documentation".to_vec());
    Ok(())
}

#[test]
fn substring_case_sensitive() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::Substring {
            pattern: "Hello".to_string(),
            case_sensitive: true,
            file_name: false,
        },
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 2);
    let readme = res
        .files
        .iter()
        .find(|f| f.file_name == "README.md")
        .unwrap();
    // only line 1 has the capitalized form
    assert_eq!(readme.line_matches.len(), 1);
    assert_eq!(readme.line_matches[0].line_number, 1);
    Ok(())
}

#[test]
fn file_name_substring() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::Substring {
            pattern: "util".to_string(),
            case_sensitive: false,
            file_name: true,
        },
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "lib/util.rs");
    assert!(res.files[0].line_matches[0].file_name);
    Ok(())
}

#[test]
fn whole_file_content() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::substring("helper"),
        &SearchOptions {
            whole: true,
            ..Default::default()
        },
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(
        res.files[0].content.as_deref(),
        Some(b"pub fn helper() -> u32 {\n    42\n}\n".as_ref())
    );
    Ok(())
}

#[test]
fn branch_and_language_filters() -> Result<()> {
    let d = build_test_shard()?;
    let ctx = Context::background();

    let res = d.search(
        &ctx,
        &Query::and(vec![
            Query::substring("hello"),
            Query::Branch("dev".to_string()),
        ]),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "README.md");
    assert_eq!(res.files[0].branches, vec!["dev".to_string()]);

    let res = d.search(
        &ctx,
        &Query::and(vec![
            Query::substring("hello"),
            Query::Language("Rust".to_string()),
        ]),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "src/main.rs");
    assert_eq!(res.files[0].language, "Rust");
    Ok(())
}

#[test]
fn not_and_or_combinations() -> Result<()> {
    let d = build_test_shard()?;
    let ctx = Context::background();

    let res = d.search(
        &ctx,
        &Query::and(vec![
            Query::substring("hello"),
            Query::Not(Box::new(Query::substring("documentation"))),
        ]),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "src/main.rs");

    let res = d.search(
        &ctx,
        &Query::or(vec![
            Query::substring("helper"),
            Query::substring("documentation"),
        ]),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 2);
    Ok(())
}

#[test]
fn regex_search() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::Regex {
            pattern: r"hel+o".to_string(),
            case_sensitive: false,
            file_name: false,
        },
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 2);

    let err = d.search(
        &Context::background(),
        &Query::Regex {
            pattern: "(unclosed".to_string(),
            case_sensitive: false,
            file_name: false,
        },
        &SearchOptions::default(),
    );
    assert!(matches!(err, Err(fossick::Error::Query(_))));
    Ok(())
}

#[test]
fn chunk_matches_group_adjacent_lines() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::and(vec![
            Query::substring("hello"),
            Query::Repo("testrepo".to_string()),
        ]),
        &SearchOptions {
            chunk_matches: true,
            ..Default::default()
        },
    )?;
    let readme = res
        .files
        .iter()
        .find(|f| f.file_name == "README.md")
        .unwrap();
    // lines 1-2 are adjacent, line 4 stands alone
    assert_eq!(readme.chunk_matches.len(), 2);
    assert_eq!(readme.chunk_matches[0].start_line, 1);
    assert_eq!(readme.chunk_matches[0].ranges.len(), 2);
    assert_eq!(readme.chunk_matches[1].start_line, 4);
    assert!(readme.line_matches.is_empty());
    Ok(())
}

#[test]
fn shard_max_match_count_truncates() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::substring("hello"),
        &SearchOptions {
            shard_max_match_count: 1,
            ..Default::default()
        },
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.stats.match_count, 1);
    Ok(())
}

#[test]
fn canceled_context_returns_empty() -> Result<()> {
    let d = build_test_shard()?;
    let ctx = Context::background().child();
    ctx.cancel();
    let res = d.search(&ctx, &Query::substring("hello"), &SearchOptions::default())?;
    assert!(res.files.is_empty());
    Ok(())
}

#[test]
fn bloom_filter_skips_absent_words() -> Result<()> {
    // Enough distinct words that the shrunk filter keeps a realistic load
    // and clear bits remain for the probe to miss.
    let mut content = String::new();
    for i in 0..6000usize {
        let mut n = i;
        let mut w = [b'a'; 5];
        for slot in w.iter_mut().rev() {
            *slot = b'a' + (n % 26) as u8;
            n /= 26;
        }
        content.push_str(std::str::from_utf8(&w).unwrap());
        content.push(' ');
    }
    let mut b = IndexBuilder::new(Repository::default());
    b.add(Document {
        name: "words.txt".to_string(),
        content: content.into_bytes(),
        ..Default::default()
    })?;
    let mut buf = Vec::new();
    b.write(&mut buf)?;
    let d = new_searcher(Box::new(MemIndexFile::new(buf)))?;

    let res = d.search(
        &Context::background(),
        &Query::substring("zebra mustang quixotic"),
        &SearchOptions::default(),
    )?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.shards_skipped_filter, 1);

    // present words pass the filter
    let res = d.search(
        &Context::background(),
        &Query::substring("aaaab"),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.stats.shards_skipped_filter, 0);
    Ok(())
}

#[test]
fn symbols_and_runes_roundtrip() -> Result<()> {
    let mut b = IndexBuilder::new(test_repo());
    b.add(Document {
        name: "uni.rs".to_string(),
        content: "héllo wörld\n".as_bytes().to_vec(),
        branches: vec!["main".to_string()],
        language: "Rust".to_string(),
        symbols: vec![
            Symbol {
                name: "héllo".to_string(),
                start: 0,
                line: 1,
            },
            Symbol {
                name: "wörld".to_string(),
                start: 7,
                line: 1,
            },
        ],
        ..Default::default()
    })?;
    let mut buf = Vec::new();
    b.write(&mut buf)?;
    let d = new_searcher(Box::new(MemIndexFile::new(buf)))?;

    assert_eq!(d.doc_count(), 1);
    // h é l l o ' ' w ö r l d \n = 12 runes
    assert_eq!(d.doc_rune_bounds(0), (0, 12));
    let syms = d.doc_symbols(0);
    assert_eq!(syms.len(), 2);
    assert_eq!(syms[0].name, "héllo");
    assert_eq!(syms[1].name, "wörld");
    assert_eq!(syms[1].start, 7);
    assert!(!d.metadata().plain_ascii);
    Ok(())
}

#[test]
fn shard_list_and_stats() -> Result<()> {
    let d = build_test_shard()?;
    let ctx = Context::background();

    let rl = d.list(&ctx, &Query::Repo("estrep".to_string()), &ListOptions::default())?;
    assert_eq!(rl.repos.len(), 1);
    assert_eq!(rl.repos[0].repository.name, "testrepo");
    assert_eq!(rl.repos[0].stats.shards, 1);
    assert_eq!(rl.repos[0].stats.documents, 3);

    let rl = d.list(&ctx, &Query::Repo("elsewhere".to_string()), &ListOptions::default())?;
    assert!(rl.repos.is_empty());

    let rl = d.list(
        &ctx,
        &Query::Const(true),
        &ListOptions { minimal: true },
    )?;
    assert!(rl.repos.is_empty());
    assert_eq!(rl.minimal.len(), 1);
    assert!(rl.minimal[&77].has_symbols);

    let stats = d.stats()?;
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.shards, 1);
    Ok(())
}

#[test]
fn mmap_shard_roundtrip() -> Result<()> {
    let repo = test_repo();
    let mut b = IndexBuilder::new(repo);
    b.add(Document {
        name: "a.txt".to_string(),
        content: b"hello fossick shard".to_vec(),
        branches: vec!["main".to_string()],
        ..Default::default()
    })?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("index.shard");
    let mut f = std::fs::File::create(&path)?;
    b.write(&mut f)?;
    drop(f);

    let d = new_searcher(Box::new(MmapIndexFile::open(&path)?))?;
    let res = d.search(
        &Context::background(),
        &Query::substring("fossick"),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert!(res.files[0].file_name.ends_with("a.txt"));
    Ok(())
}

#[test]
fn corrupt_shard_is_rejected() -> Result<()> {
    let mut b = IndexBuilder::new(Repository::default());
    b.add(Document {
        name: "a.txt".to_string(),
        content: b"some bytes to index".to_vec(),
        ..Default::default()
    })?;
    let mut buf = Vec::new();
    b.write(&mut buf)?;

    // bad footer magic
    let mut bad = buf.clone();
    let n = bad.len();
    bad[n - 16] ^= 0xFF;
    assert!(matches!(
        new_searcher(Box::new(MemIndexFile::new(bad))),
        Err(fossick::Error::InvalidShard(_))
    ));

    // bad header magic
    let mut bad = buf.clone();
    bad[0] ^= 0xFF;
    assert!(new_searcher(Box::new(MemIndexFile::new(bad))).is_err());

    // truncated
    assert!(new_searcher(Box::new(MemIndexFile::new(buf[..10].to_vec()))).is_err());
    Ok(())
}

#[test]
fn short_pattern_falls_back_to_scan() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::substring("42"),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "lib/util.rs");
    Ok(())
}

#[test]
fn filename_type_omits_line_matches() -> Result<()> {
    let d = build_test_shard()?;
    let res = d.search(
        &Context::background(),
        &Query::Type {
            kind: fossick::query::QueryType::FileName,
            child: Box::new(Query::substring("hello")),
        },
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 2);
    for f in &res.files {
        assert!(f.line_matches.is_empty());
        assert!(f.chunk_matches.is_empty());
    }
    Ok(())
}
