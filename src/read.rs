// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

use crate::dna::reverse_complement;

/// A sequencing read. Qualities are Phred scores, not ASCII offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Read {
    pub id: String,
    pub numeric_id: u64,
    pub bases: Vec<u8>,
    pub quals: Option<Vec<u8>>,
    pub discarded: bool,
}

impl Read {
    pub fn new(id: impl Into<String>, numeric_id: u64, bases: Vec<u8>, quals: Option<Vec<u8>>) -> Self {
        Read {
            id: id.into(),
            numeric_id,
            bases,
            quals,
            discarded: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn quality(&self, pos: usize) -> Option<u8> {
        self.quals.as_ref().map(|q| q[pos])
    }

    pub fn reverse_complement(&mut self) {
        reverse_complement(&mut self.bases);
        if let Some(q) = self.quals.as_mut() {
            q.reverse();
        }
    }

    /// Drops `n` bases from the right end.
    pub fn trim_right(&mut self, n: usize) {
        let len = self.bases.len().saturating_sub(n);
        self.bases.truncate(len);
        if let Some(q) = self.quals.as_mut() {
            q.truncate(len);
        }
    }

    /// Drops `n` bases from the left end.
    pub fn trim_left(&mut self, n: usize) {
        let n = n.min(self.bases.len());
        self.bases.drain(..n);
        if let Some(q) = self.quals.as_mut() {
            q.drain(..n);
        }
    }
}

/// A read and its optional mate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadPair {
    pub r1: Read,
    pub r2: Option<Read>,
}

impl ReadPair {
    pub fn single(r1: Read) -> Self {
        ReadPair { r1, r2: None }
    }

    pub fn paired(r1: Read, r2: Read) -> Self {
        ReadPair { r1, r2: Some(r2) }
    }

    pub fn reads(&self) -> impl Iterator<Item = &Read> {
        std::iter::once(&self.r1).chain(self.r2.as_ref())
    }
}
