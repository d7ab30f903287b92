// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Deterministic sequences and small tables for unit tests.

use debruijn::Kmer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dna::code_base;
use crate::kmer_table::{KmerCounter, KmerTable};

/// Random 2-bit codes; long enough sequences avoid accidental k-mer repeats.
pub fn random_codes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..4u8)).collect()
}

pub fn random_dna(seed: u64, len: usize) -> Vec<u8> {
    random_codes(seed, len).into_iter().map(code_base).collect()
}

/// Table holding every k-mer of each sequence, counted `weight` times.
pub fn table_from<K: Kmer + Send + Sync>(seqs: &[(&[u8], u32)]) -> KmerTable<K> {
    let counter = KmerCounter::new();
    for &(seq, weight) in seqs {
        counter.add_weighted(seq, weight);
    }
    counter.into_table(4, 1)
}
