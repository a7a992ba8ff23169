use anyhow::Result;

use fossick::query::Query;
use fossick::shard::Section;
use fossick::types::{Context, Document, Repository, SearchOptions, Searcher};
use fossick::{convert, merge, new_searcher, read_toc, IndexBuilder, IndexFile, MemIndexFile};

fn test_docs() -> Vec<Document> {
    vec![
        Document {
            name: "f2".to_string(),
            content: b"to carry water in the no later bla".to_vec(),
            ..Default::default()
        },
        Document {
            name: "f3/f3".to_string(),
            content: "hey this one actually\nbl\u{221a}\u{00b0}\nhas\nnew lines"
                .as_bytes()
                .to_vec(),
            ..Default::default()
        },
    ]
}

fn build_shard_bytes(version: Option<u32>) -> Result<Vec<u8>> {
    let mut b = IndexBuilder::new(Repository::default());
    if let Some(v) = version {
        b.set_format_version(v)?;
    }
    for d in test_docs() {
        b.add(d)?;
    }
    let mut buf = Vec::new();
    b.write(&mut buf)?;
    Ok(buf)
}

fn read_simple(f: &dyn IndexFile, sec: fossick::shard::SimpleSection) -> Vec<u8> {
    f.read(sec.off, sec.sz).unwrap()
}

fn read_compound(f: &dyn IndexFile, sec: fossick::shard::CompoundSection) -> Vec<Vec<u8>> {
    let offsets_raw = read_simple(f, sec.offsets);
    let offsets: Vec<u32> = offsets_raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let mut out = Vec::new();
    for (i, &off) in offsets.iter().enumerate() {
        let next = offsets
            .get(i + 1)
            .copied()
            .unwrap_or(sec.data.off + sec.data.sz);
        out.push(
            f.read(off, next - off).unwrap(),
        );
    }
    out
}

/// Compare two shards through the codec's own section list, then as whole
/// byte streams in case the section walk misses something.
fn assert_shard_equal(a: &dyn IndexFile, b: &dyn IndexFile) {
    let (toc_a, ver_a) = read_toc(a).unwrap();
    let (toc_b, ver_b) = read_toc(b).unwrap();
    assert_eq!(ver_a, ver_b, "format versions differ");

    for ((name_a, sec_a), (name_b, sec_b)) in toc_a
        .sections(ver_a)
        .into_iter()
        .zip(toc_b.sections(ver_b))
    {
        assert_eq!(name_a, name_b);
        match (sec_a, sec_b) {
            (Section::Simple(sa), Section::Simple(sb)) => {
                assert_eq!(
                    read_simple(a, sa),
                    read_simple(b, sb),
                    "section {} differs",
                    name_a
                );
            }
            (Section::Compound(ca), Section::Compound(cb))
            | (Section::LazyCompound(ca), Section::LazyCompound(cb)) => {
                assert_eq!(
                    read_compound(a, ca),
                    read_compound(b, cb),
                    "section {} differs",
                    name_a
                );
            }
            _ => panic!("section {} changed kind", name_a),
        }
    }

    let all_a = a.read(0, a.size().unwrap()).unwrap();
    let all_b = b.read(0, b.size().unwrap()).unwrap();
    assert_eq!(all_a, all_b, "byte streams differ");
}

#[test]
fn convert_roundtrip_is_byte_identical() -> Result<()> {
    let buf = build_shard_bytes(None)?;
    let origin = MemIndexFile::new(buf.clone());
    let d = new_searcher(Box::new(MemIndexFile::new(buf)))?;

    let mut b2 = convert(&d)?;
    let mut buf2 = Vec::new();
    b2.write(&mut buf2)?;

    assert_shard_equal(&origin, &MemIndexFile::new(buf2));
    Ok(())
}

#[test]
fn convert_roundtrip_previous_version() -> Result<()> {
    let buf = build_shard_bytes(Some(1))?;
    let origin = MemIndexFile::new(buf.clone());
    let d = new_searcher(Box::new(MemIndexFile::new(buf)))?;
    assert_eq!(d.format_version(), 1);

    let mut b2 = convert(&d)?;
    let mut buf2 = Vec::new();
    b2.write(&mut buf2)?;
    assert_shard_equal(&origin, &MemIndexFile::new(buf2));
    Ok(())
}

#[test]
fn convert_twice_is_stable() -> Result<()> {
    let buf = build_shard_bytes(None)?;
    let d = new_searcher(Box::new(MemIndexFile::new(buf.clone())))?;
    let mut b2 = convert(&d)?;
    let mut buf2 = Vec::new();
    b2.write(&mut buf2)?;

    let d2 = new_searcher(Box::new(MemIndexFile::new(buf2.clone())))?;
    let mut b3 = convert(&d2)?;
    let mut buf3 = Vec::new();
    b3.write(&mut buf3)?;

    assert_eq!(buf2, buf3);
    Ok(())
}

#[test]
fn converted_shard_still_searches() -> Result<()> {
    let buf = build_shard_bytes(None)?;
    let d = new_searcher(Box::new(MemIndexFile::new(buf)))?;
    let mut b2 = convert(&d)?;
    let mut buf2 = Vec::new();
    b2.write(&mut buf2)?;
    let d2 = new_searcher(Box::new(MemIndexFile::new(buf2)))?;

    let res = d2.search(
        &Context::background(),
        &Query::substring("carry water"),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file_name, "f2");
    Ok(())
}

#[test]
fn merge_combines_documents() -> Result<()> {
    let repo = Repository {
        name: "merged".to_string(),
        ..Default::default()
    };
    let mut a = IndexBuilder::new(repo.clone());
    a.add(Document {
        name: "one.txt".to_string(),
        content: b"needle in the first shard".to_vec(),
        ..Default::default()
    })?;
    let mut buf_a = Vec::new();
    a.write(&mut buf_a)?;

    let mut b = IndexBuilder::new(repo);
    b.add(Document {
        name: "two.txt".to_string(),
        content: b"needle in the second shard".to_vec(),
        ..Default::default()
    })?;
    let mut buf_b = Vec::new();
    b.write(&mut buf_b)?;

    let da = new_searcher(Box::new(MemIndexFile::new(buf_a)))?;
    let db = new_searcher(Box::new(MemIndexFile::new(buf_b)))?;

    let mut merged = merge(&[&da, &db])?;
    let mut buf_m = Vec::new();
    merged.write(&mut buf_m)?;
    let dm = new_searcher(Box::new(MemIndexFile::new(buf_m)))?;

    assert_eq!(dm.doc_count(), 2);
    let res = dm.search(
        &Context::background(),
        &Query::substring("needle"),
        &SearchOptions::default(),
    )?;
    assert_eq!(res.files.len(), 2);

    assert!(merge(&[]).is_err());
    Ok(())
}
