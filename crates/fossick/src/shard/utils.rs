use anyhow::{bail, Context, Result};

// Varint helpers: LEB128-style unsigned varint for u32, shared by the
// posting encoders and the delta codec.
pub(crate) fn write_var_u32(out: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub(crate) fn read_var_u32(buf: &[u8], off: &mut usize) -> Result<u32> {
    let mut shift = 0u32;
    let mut out: u32 = 0;
    loop {
        if *off >= buf.len() {
            bail!("unexpected EOF while reading varint");
        }
        let b = buf[*off];
        *off += 1;
        out |= ((b & 0x7F) as u32) << shift;
        if (b & 0x80) == 0 {
            return Ok(out);
        }
        shift += 7;
        if shift >= 35 {
            bail!("varint too long");
        }
    }
}

/// Delta-encode sorted offsets: varints of successive differences, the
/// first relative to 0.
pub(crate) fn to_deltas(offsets: &[u32]) -> Vec<u8> {
    let mut deltas = Vec::with_capacity(offsets.len() * 2);
    let mut last: u32 = 0;
    for &p in offsets {
        write_var_u32(&mut deltas, p.wrapping_sub(last));
        last = p;
    }
    deltas
}

/// Inverse of `to_deltas`.
pub(crate) fn from_deltas(buf: &[u8]) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    let mut off = 0usize;
    let mut last: u32 = 0;
    while off < buf.len() {
        let d = read_var_u32(buf, &mut off)?;
        last = last.wrapping_add(d);
        out.push(last);
    }
    Ok(out)
}

pub(crate) fn u16s_to_bytes(xs: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(xs.len() * 2);
    for x in xs {
        out.extend(&x.to_le_bytes());
    }
    out
}

pub(crate) fn u32s_to_bytes(xs: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(xs.len() * 4);
    for x in xs {
        out.extend(&x.to_le_bytes());
    }
    out
}

pub(crate) fn u64s_to_bytes(xs: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(xs.len() * 8);
    for x in xs {
        out.extend(&x.to_le_bytes());
    }
    out
}

pub(crate) fn bytes_to_u16s(buf: &[u8]) -> Result<Vec<u16>> {
    if buf.len() % 2 != 0 {
        bail!("u16 array section has odd length {}", buf.len());
    }
    Ok(buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn bytes_to_u32s(buf: &[u8]) -> Result<Vec<u32>> {
    if buf.len() % 4 != 0 {
        bail!("u32 array section length {} not a multiple of 4", buf.len());
    }
    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn bytes_to_u64s(buf: &[u8]) -> Result<Vec<u64>> {
    if buf.len() % 8 != 0 {
        bail!("u64 array section length {} not a multiple of 8", buf.len());
    }
    Ok(buf
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// String list: u32 count, then u32 length + raw bytes per entry.
pub(crate) fn strings_to_bytes(xs: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(&(xs.len() as u32).to_le_bytes());
    for s in xs {
        out.extend(&(s.len() as u32).to_le_bytes());
        out.extend(s.as_bytes());
    }
    out
}

pub(crate) fn bytes_to_strings(buf: &[u8]) -> Result<Vec<String>> {
    let mut off = 0usize;
    let take_u32 = |buf: &[u8], off: &mut usize| -> Result<u32> {
        if *off + 4 > buf.len() {
            bail!("string list truncated at {}", off);
        }
        let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
        *off += 4;
        Ok(v)
    };
    let count = take_u32(buf, &mut off)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = take_u32(buf, &mut off)? as usize;
        if off + len > buf.len() {
            bail!("string list entry truncated at {}", off);
        }
        let s = std::str::from_utf8(&buf[off..off + len])
            .context("string list entry not valid UTF-8")?
            .to_string();
        off += len;
        out.push(s);
    }
    if off != buf.len() {
        bail!("trailing bytes in string list");
    }
    Ok(out)
}

/// All start offsets of `needle` in `haystack`.
pub(crate) fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let first = needle[0];
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i] == first && &haystack[i..i + needle.len()] == needle {
            out.push(i);
        }
        i += 1;
    }
    out
}

/// Iterate rune start positions of a byte slice. UTF-8 continuation bytes
/// are skipped; any other byte (including invalid sequences) counts as a
/// rune of its own, so the walk is total over arbitrary bytes.
pub(crate) fn rune_starts(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    data.iter()
        .enumerate()
        .filter(|(_, &b)| b & 0xC0 != 0x80)
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_u32_roundtrip() {
        let mut buf = Vec::new();
        for v in [0u32, 1, 127, 128, 300, 1 << 20, u32::MAX] {
            write_var_u32(&mut buf, v);
        }
        let mut off = 0;
        for v in [0u32, 1, 127, 128, 300, 1 << 20, u32::MAX] {
            assert_eq!(read_var_u32(&buf, &mut off).unwrap(), v);
        }
        assert_eq!(off, buf.len());
    }

    #[test]
    fn deltas_roundtrip() {
        let cases: &[&[u32]] = &[
            &[],
            &[0],
            &[5],
            &[1, 2, 3],
            &[0, 100, 10_000, 10_001, 1 << 30],
        ];
        for xs in cases {
            let enc = to_deltas(xs);
            let dec = from_deltas(&enc).unwrap();
            assert_eq!(&dec, xs);
        }
    }

    #[test]
    fn find_all_overlapping() {
        assert_eq!(find_all(b"aaaa", b"aa"), vec![0, 1, 2]);
        assert_eq!(find_all(b"abcabc", b"abc"), vec![0, 3]);
        assert!(find_all(b"short", b"longer needle").is_empty());
    }

    #[test]
    fn rune_starts_mixed() {
        // "ab" + 2-byte é + "c"
        let data = "abéc".as_bytes();
        let starts: Vec<usize> = rune_starts(data).collect();
        assert_eq!(starts, vec![0, 1, 2, 4]);
        // invalid bytes each count as a rune
        let bad = [0x61, 0xFF, 0x62];
        assert_eq!(rune_starts(&bad).count(), 3);
    }
}
