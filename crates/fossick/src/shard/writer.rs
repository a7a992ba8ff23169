use anyhow::{bail, Context, Result};
use std::io::Write;

use super::{CompoundSection, IndexToc, SimpleSection, FOOTER_LEN, MAGIC};

/// Streams sections to a sink while tracking absolute offsets, so the
/// writer never seeks: the TOC and footer are emitted last.
pub(crate) struct SectionWriter<W: Write> {
    w: W,
    off: u32,
}

impl<W: Write> SectionWriter<W> {
    pub(crate) fn new(w: W) -> Result<Self> {
        let mut sw = SectionWriter { w, off: 0 };
        sw.raw(&MAGIC.to_le_bytes())?;
        Ok(sw)
    }

    fn raw(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > (u32::MAX - self.off) as usize {
            bail!("shard exceeds u32 address space");
        }
        self.w.write_all(data).context("write shard section")?;
        self.off += data.len() as u32;
        Ok(())
    }

    pub(crate) fn simple(&mut self, data: &[u8]) -> Result<SimpleSection> {
        let off = self.off;
        self.raw(data)?;
        Ok(SimpleSection {
            off,
            sz: self.off - off,
        })
    }

    /// Write elements back to back, then their absolute offsets as the
    /// offsets section.
    pub(crate) fn compound<'a, I>(&mut self, elements: I) -> Result<CompoundSection>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let data_off = self.off;
        let mut abs = Vec::new();
        for el in elements {
            abs.push(self.off);
            self.raw(el)?;
        }
        let data = SimpleSection {
            off: data_off,
            sz: self.off - data_off,
        };
        let mut offsets_bytes = Vec::with_capacity(abs.len() * 4);
        for o in &abs {
            offsets_bytes.extend(&o.to_le_bytes());
        }
        let offsets = self.simple(&offsets_bytes)?;
        Ok(CompoundSection { data, offsets })
    }

    /// Emit the TOC and footer. Consumes the writer; the stream is complete
    /// afterwards.
    pub(crate) fn finish(mut self, toc: &IndexToc, version: u32) -> Result<()> {
        let toc_bytes = toc.encode(version);
        let toc_sec = self.simple(&toc_bytes)?;
        let mut footer = Vec::with_capacity(FOOTER_LEN);
        footer.extend(&MAGIC.to_le_bytes());
        footer.extend(&toc_sec.off.to_le_bytes());
        footer.extend(&toc_sec.sz.to_le_bytes());
        footer.extend(&version.to_le_bytes());
        self.raw(&footer)?;
        self.w.flush().context("flush shard")?;
        Ok(())
    }
}
