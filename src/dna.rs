// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Conversions between ASCII reads, 2-bit base codes and packed k-mers.
//!
//! Walk paths are kept as `Vec<u8>` of 2-bit codes so they can be packed
//! into k-mers without re-validating; reads stay ASCII because they may
//! carry `N`.

use debruijn::Kmer;
use lazy_static::lazy_static;

const CODE_TO_BASE: [u8; 4] = *b"ACGT";
const NOT_A_BASE: u8 = 4;

lazy_static! {
    static ref BASE_CODES: [u8; 256] = {
        let mut codes = [NOT_A_BASE; 256];
        for (code, &base) in CODE_TO_BASE.iter().enumerate() {
            codes[base as usize] = code as u8;
            codes[base.to_ascii_lowercase() as usize] = code as u8;
        }
        codes
    };
}

/// 2-bit code of an ASCII base, `None` for anything outside ACGT.
#[inline]
pub fn base_code(base: u8) -> Option<u8> {
    let code = BASE_CODES[base as usize];
    if code < NOT_A_BASE {
        Some(code)
    } else {
        None
    }
}

#[inline]
pub fn code_base(code: u8) -> u8 {
    CODE_TO_BASE[(code & 3) as usize]
}

pub fn complement_base(base: u8) -> u8 {
    match base_code(base) {
        Some(code) => code_base(3 - code),
        None => b'N',
    }
}

pub fn reverse_complement(bases: &mut [u8]) {
    bases.reverse();
    for b in bases.iter_mut() {
        *b = complement_base(*b);
    }
}

pub fn reverse_complement_codes(codes: &mut [u8]) {
    codes.reverse();
    for c in codes.iter_mut() {
        *c = 3 - *c;
    }
}

pub fn codes_to_ascii(codes: &[u8]) -> Vec<u8> {
    codes.iter().map(|&c| code_base(c)).collect()
}

/// 2-bit codes of a read, `None` if it holds a non-ACGT base.
pub fn ascii_to_codes(bases: &[u8]) -> Option<Vec<u8>> {
    bases.iter().map(|&b| base_code(b)).collect()
}

/// Orientation independent key of a k-mer.
#[inline]
pub fn canonical<K: Kmer>(kmer: &K) -> K {
    kmer.min_rc_flip().0
}

/// Packs the first k codes.
pub fn kmer_from_codes<K: Kmer>(codes: &[u8]) -> K {
    codes[..K::k()]
        .iter()
        .fold(K::empty(), |kmer, &c| kmer.extend_right(c))
}

/// Packs the last k codes.
pub fn last_kmer<K: Kmer>(codes: &[u8]) -> K {
    kmer_from_codes(&codes[codes.len() - K::k()..])
}

/// K-mer starting at `pos` of an ASCII read, `None` if the window holds a
/// non-ACGT base or runs off the end.
pub fn kmer_at<K: Kmer>(bases: &[u8], pos: usize) -> Option<K> {
    let window = bases.get(pos..pos + K::k())?;
    window.iter().try_fold(K::empty(), |kmer, &b| {
        base_code(b).map(|c| kmer.extend_right(c))
    })
}

/// Iterator over the k-mers of a 2-bit path.
pub struct PathKmers<'a, K> {
    codes: &'a [u8],
    pos: usize,
    kmer: K,
}

pub fn path_kmers<K: Kmer>(codes: &[u8]) -> PathKmers<'_, K> {
    PathKmers {
        codes,
        pos: 0,
        kmer: K::empty(),
    }
}

impl<K: Kmer> Iterator for PathKmers<'_, K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let k = K::k();
        if self.pos == 0 {
            if self.codes.len() < k {
                return None;
            }
            self.kmer = kmer_from_codes(self.codes);
            self.pos = k;
        } else if self.pos < self.codes.len() {
            self.kmer = self.kmer.extend_right(self.codes[self.pos]);
            self.pos += 1;
        } else {
            return None;
        }
        Some(self.kmer)
    }
}

/// Iterator over every k-mer window of an ASCII read, yielding `None` for
/// windows that contain a non-ACGT base.
pub struct ReadKmers<'a, K> {
    bases: &'a [u8],
    pos: usize,
    run: usize,
    kmer: K,
}

pub fn read_kmers<K: Kmer>(bases: &[u8]) -> ReadKmers<'_, K> {
    ReadKmers {
        bases,
        pos: 0,
        run: 0,
        kmer: K::empty(),
    }
}

impl<K: Kmer> Iterator for ReadKmers<'_, K> {
    type Item = Option<K>;

    fn next(&mut self) -> Option<Option<K>> {
        let k = K::k();
        while self.pos < self.bases.len() {
            match base_code(self.bases[self.pos]) {
                Some(c) => {
                    self.kmer = self.kmer.extend_right(c);
                    self.run += 1;
                }
                None => self.run = 0,
            }
            self.pos += 1;
            if self.pos >= k {
                return Some(if self.run >= k { Some(self.kmer) } else { None });
            }
        }
        None
    }
}
