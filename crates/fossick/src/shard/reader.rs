use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Error;
use super::{IndexToc, SimpleSection, FOOTER_LEN, FORMAT_VERSION, MAGIC, MIN_READ_VERSION};

/// Random-access view of a shard's bytes. Reads return owned copies so
/// results stay valid after the backing storage goes away.
pub trait IndexFile: Send + Sync {
    fn read(&self, off: u32, sz: u32) -> Result<Vec<u8>>;
    fn size(&self) -> Result<u32>;
    fn name(&self) -> String {
        "index".to_string()
    }
}

/// A shard held entirely in memory; used by tests and conversion.
pub struct MemIndexFile {
    data: Vec<u8>,
}

impl MemIndexFile {
    pub fn new(data: Vec<u8>) -> Self {
        MemIndexFile { data }
    }
}

impl IndexFile for MemIndexFile {
    fn read(&self, off: u32, sz: u32) -> Result<Vec<u8>> {
        let (off, sz) = (off as usize, sz as usize);
        if off + sz > self.data.len() {
            bail!(
                "read [{}, {}) beyond shard of {} bytes",
                off,
                off + sz,
                self.data.len()
            );
        }
        Ok(self.data[off..off + sz].to_vec())
    }

    fn size(&self) -> Result<u32> {
        Ok(self.data.len() as u32)
    }

    fn name(&self) -> String {
        "mem".to_string()
    }
}

/// A memory-mapped shard file on disk.
pub struct MmapIndexFile {
    path: PathBuf,
    mmap: Mmap,
}

impl MmapIndexFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(MmapIndexFile { path, mmap })
    }
}

impl IndexFile for MmapIndexFile {
    fn read(&self, off: u32, sz: u32) -> Result<Vec<u8>> {
        let (off, sz) = (off as usize, sz as usize);
        if off + sz > self.mmap.len() {
            bail!(
                "read [{}, {}) beyond shard of {} bytes",
                off,
                off + sz,
                self.mmap.len()
            );
        }
        Ok(self.mmap[off..off + sz].to_vec())
    }

    fn size(&self) -> Result<u32> {
        Ok(self.mmap.len() as u32)
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

pub(crate) fn read_section(f: &dyn IndexFile, sec: SimpleSection) -> Result<Vec<u8>> {
    f.read(sec.off, sec.sz)
}

/// Locate and parse the TOC: verify the leading magic, then the fixed-size
/// footer at the end of the stream, then decode the TOC section it points
/// at. Returns the TOC and the shard's format version.
pub fn read_toc(f: &dyn IndexFile) -> Result<(IndexToc, u32), Error> {
    parse_toc(f).map_err(|e| Error::InvalidShard(format!("{:#}", e)))
}

fn parse_toc(f: &dyn IndexFile) -> Result<(IndexToc, u32)> {
    let size = f.size()?;
    if (size as usize) < 4 + FOOTER_LEN {
        bail!("shard too small ({} bytes)", size);
    }
    let head = f.read(0, 4).context("read header magic")?;
    if u32::from_le_bytes(head[..4].try_into().unwrap()) != MAGIC {
        bail!("bad header magic");
    }
    let footer = f
        .read(size - FOOTER_LEN as u32, FOOTER_LEN as u32)
        .context("read footer")?;
    let magic = u32::from_le_bytes(footer[0..4].try_into().unwrap());
    if magic != MAGIC {
        bail!("bad footer magic");
    }
    let toc_off = u32::from_le_bytes(footer[4..8].try_into().unwrap());
    let toc_sz = u32::from_le_bytes(footer[8..12].try_into().unwrap());
    let version = u32::from_le_bytes(footer[12..16].try_into().unwrap());
    if !(MIN_READ_VERSION..=FORMAT_VERSION).contains(&version) {
        bail!(
            "version {} outside readable range {}..={}",
            version,
            MIN_READ_VERSION,
            FORMAT_VERSION
        );
    }
    if toc_off
        .checked_add(toc_sz)
        .map(|end| end > size - FOOTER_LEN as u32)
        .unwrap_or(true)
    {
        bail!("toc [{}, +{}) out of bounds", toc_off, toc_sz);
    }
    let toc_bytes = f.read(toc_off, toc_sz).context("read toc")?;
    let toc = IndexToc::decode(&toc_bytes, version).context("decode toc")?;
    Ok((toc, version))
}
