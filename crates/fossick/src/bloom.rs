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

//! Bloom filter over case-insensitive word fragments, used as a whole-shard
//! pre-filter before the trigram index is consulted.
//!
//! The default hash confines each key's probes to a 512-bit block, giving a
//! blocked bloom filter:
//! https://algo2.iti.kit.edu/singler/publications/cacheefficientbloomfilters-wea2007.pdf
//!
//! CRC over word fragments of length 4-7, block size 512 bits, 3 probes per
//! fragment length. Castagnoli CRCs have hardware instructions on common
//! platforms, which keeps hashing off the indexing profile.

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// Least common multiple of {1..18}.
///
/// This permits precise resizing for many different factors without using
/// excessive RAM during processing. Some shards will saturate the filter
/// (land above the target load); those fall back to the trigram index.
pub const BLOOM_SIZE_BASE: usize = 12_252_240;

/// Target load factor for filters written into shards; empirically close to
/// a 1% false positive rate at minimal size for the default hasher.
pub const BLOOM_DEFAULT_LOAD: f64 = 0.42;

const MIN_WORD_LENGTH: usize = 4;

/// Hash functions usable by the filter. The behavior behind an id must
/// never change: evolving the hash means adding a new variant with a fresh
/// id and keeping the old one decodable, otherwise existing shards start
/// returning false negatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomHasher {
    /// 512-bit blocks keyed by the fragment's first four bytes, probes for
    /// fragment lengths 4..=7, three probes per length.
    CrcBlocked64B8K3,
}

/// The hashers known to this build, in id order. Decode takes this table as
/// an explicit argument so registration is visible at the call site.
pub const BLOOM_HASHERS: &[BloomHasher] = &[BloomHasher::CrcBlocked64B8K3];

impl BloomHasher {
    pub fn id(&self) -> u8 {
        match self {
            BloomHasher::CrcBlocked64B8K3 => 1,
        }
    }

    pub fn from_id(id: u8, hashers: &[BloomHasher]) -> Option<BloomHasher> {
        hashers.iter().copied().find(|h| h.id() == id)
    }

    /// Split `input` into case-insensitive word fragments and hash them.
    pub fn probes(&self, input: &[u8]) -> Vec<u32> {
        match self {
            BloomHasher::CrcBlocked64B8K3 => crc_blocked_64b_8_k3(input),
        }
    }
}

// Table-driven matcher for \w{4,}. 'Z' is included; the exclusive upper
// bound this table once used truncated fragments containing it.
static WORD_TAB: Lazy<[u64; 4]> = Lazy::new(|| {
    let mut tab = [0u64; 4];
    for x in 0u8..128 {
        if x == b'_' || x.is_ascii_alphanumeric() {
            tab[(x / 64) as usize] |= 1 << (x % 64);
        }
    }
    tab
});

#[inline]
fn is_word_byte(b: u8) -> bool {
    WORD_TAB[(b / 64) as usize] & (1 << (b % 64)) != 0
}

/// Advance past the next word of at least `MIN_WORD_LENGTH` word bytes,
/// returning its lowercased copy.
fn next_word(input: &[u8], mut i: usize) -> (usize, Option<Vec<u8>>) {
    while i < input.len() {
        // skip non-word bytes
        while i < input.len() && !is_word_byte(input[i]) {
            i += 1;
        }
        let word_start = i;
        while i < input.len() && is_word_byte(input[i]) {
            i += 1;
        }
        // skip short words
        if i - word_start < MIN_WORD_LENGTH {
            continue;
        }
        return (i, Some(input[word_start..i].to_ascii_lowercase()));
    }
    (i, None)
}

fn crc_blocked_64b_8_k3(input: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let (next, word) = next_word(input, i);
        i = next;
        let Some(s) = word else { continue };
        for start in 0..=s.len() - MIN_WORD_LENGTH {
            // Long numeric/hex constants are generally unlikely to be
            // searched for, so don't include probes for substrings that
            // start with a number.
            if s[start].is_ascii_digit() {
                continue;
            }
            let base = crc32c::crc32c(&s[start..start + 4]).wrapping_mul(512);
            let mut j = start + 4;
            while j < start + 8 && j <= s.len() {
                let h = crc32c::crc32c(&s[start..j]);
                out.push(base | (h % 512));
                out.push(base | ((h >> 9) % 512));
                out.push(base | ((h >> 18) % 512));
                j += 1;
            }
        }
    }
    out
}

/// A bloom filter over word fragments. Construction and mutation are
/// single-threaded; once shrunk and serialized the filter is read-only and
/// safe to share.
#[derive(Debug, Clone)]
pub struct Bloom {
    hasher: BloomHasher,
    bits: Vec<u8>,
}

impl Bloom {
    pub fn empty() -> Bloom {
        Bloom::with_hasher(BloomHasher::CrcBlocked64B8K3)
    }

    pub fn with_hasher(hasher: BloomHasher) -> Bloom {
        Bloom {
            hasher,
            bits: vec![0u8; BLOOM_SIZE_BASE],
        }
    }

    /// Number of bits in the filter.
    pub fn len(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn hasher(&self) -> BloomHasher {
        self.hasher
    }

    fn add_probes(&mut self, xs: &[u32]) {
        let n = self.bits.len();
        for &x in xs {
            self.bits[(x / 8) as usize % n] |= 1 << (x % 8);
        }
    }

    /// Split `data` into case-insensitive word fragments, hash them, and add
    /// them all to the filter.
    pub fn add_bytes(&mut self, data: &[u8]) {
        let probes = self.hasher.probes(data);
        self.add_probes(&probes);
    }

    fn maybe_has_probes(&self, xs: &[u32]) -> bool {
        let n = self.bits.len();
        xs.iter()
            .all(|&x| self.bits[(x / 8) as usize % n] & (1 << (x % 8)) != 0)
    }

    /// Whether every word fragment of `data` may be present. False negatives
    /// are impossible; false positives are expected at the configured load.
    pub fn maybe_has_bytes(&self, data: &[u8]) -> bool {
        self.maybe_has_probes(&self.hasher.probes(data))
    }

    /// Fraction of set bits.
    pub fn load(&self) -> f64 {
        let total: u64 = self.bits.iter().map(|b| b.count_ones() as u64).sum();
        total as f64 / (self.bits.len() as f64 * 8.0)
    }

    /// Return a resized filter with a bit density close to `target`.
    ///
    /// A probe x tests bit x%len, and a filter of size newlen that divides
    /// len is derived by ORing the bits together len/newlen times: when
    /// newlen divides len, x%newlen == x%len%newlen, so the filter shrinks
    /// without access to the original probes or keys. This lets us build at
    /// an upper-bound size and resize once the real cardinality is known,
    /// instead of running a separate input-counting phase.
    pub fn shrink_to_load(&self, target: f64) -> Bloom {
        if target <= 0.0 || target >= 1.0 {
            return self.clone();
        }

        // Shrinking sets each output bit to the OR of k = `factor` input
        // bits, each set with probability x = load. The output load is
        // 1-(1-x)^k; solving 1-(1-x)^k = y gives k = log(1-y)/log(1-x).
        let len = self.bits.len();
        let mut factor = len;
        let divisor = (1.0 - self.load()).ln();
        if divisor != 0.0 {
            factor = ((1.0 - target).ln() / divisor) as usize;
        }
        if factor > len {
            factor = len;
        }

        // Only factors of the input size are reachable; BLOOM_SIZE_BASE is
        // highly composite to keep candidates dense.
        while factor > 0 && len % factor != 0 {
            factor -= 1;
        }

        if factor <= 1 {
            return self.clone();
        }

        let out_len = len / factor;
        let mut out = vec![0u8; out_len];
        let mut j = 0;
        for i in 0..len {
            out[j] |= self.bits[i];
            j += 1;
            if j >= out_len {
                j = 0;
            }
        }
        Bloom {
            hasher: self.hasher,
            bits: out,
        }
    }

    /// `version | hasher id | bits`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 2);
        out.push(1); // serialization version
        out.push(self.hasher.id());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Decode an encoded filter, resolving the hasher id against an explicit
    /// table of known hashers.
    pub fn decode(buf: &[u8], hashers: &[BloomHasher]) -> Result<Bloom> {
        if buf.len() < 2 || buf[0] != 1 {
            return Err(Error::InvalidBloom(
                "wrong size/version in encoding".to_string(),
            ));
        }
        let hasher = BloomHasher::from_id(buf[1], hashers)
            .ok_or_else(|| Error::InvalidBloom(format!("unknown hasher id {}", buf[1])))?;
        Ok(Bloom {
            hasher,
            bits: buf[2..].to_vec(),
        })
    }
}
