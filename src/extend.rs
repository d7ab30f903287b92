// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

use std::marker::PhantomData;

use anyhow::Error;
use debruijn::Kmer;

use crate::config::ExtendConfig;
use crate::dna::{ascii_to_codes, code_base, kmer_at, read_kmers};
use crate::kmer_table::KmerStore;
use crate::read::Read;
use crate::walker::GraphWalker;

/// Bases to take back from an extension that stopped short of what was
/// asked for. Keyed on the read id so reruns trim identically.
pub fn rollback_amount(numeric_id: u64, extended: usize, requested: usize, rollback: usize) -> usize {
    if rollback == 0 || extended == 0 || extended >= requested {
        return 0;
    }
    extended.min((numeric_id % (rollback as u64 + 1)) as usize)
}

/// Grows reads past their ends along unbranched graph paths.
pub struct ReadExtender<'a, K, S> {
    store: &'a S,
    config: ExtendConfig,
    phantom: PhantomData<K>,
}

impl<'a, K: Kmer, S: KmerStore<K>> ReadExtender<'a, K, S> {
    pub fn new(store: &'a S, config: ExtendConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(ReadExtender {
            store,
            config,
            phantom: PhantomData,
        })
    }

    /// Extends `read` to the right by at most `distance` bases, stopping at
    /// junctions and dead ends. New bases get `extension_quality`.
    pub fn extend_read(&self, read: &mut Read, distance: usize) -> usize {
        let k = K::k();
        if distance == 0 || read.len() < k {
            return 0;
        }
        let mut path = match ascii_to_codes(&read.bases[read.len() - k..]) {
            Some(codes) => codes,
            None => return 0,
        };

        let mut walker = GraphWalker::new(self.store);
        walker.extend_right(&mut path, distance, &self.config, |_| true);
        let added = path.len() - k;

        read.bases.extend(path[k..].iter().map(|&c| code_base(c)));
        if let Some(q) = read.quals.as_mut() {
            q.resize(q.len() + added, self.config.extension_quality);
        }
        added
    }

    pub fn extend_left(&self, read: &mut Read, distance: usize) -> usize {
        read.reverse_complement();
        let added = self.extend_read(read, distance);
        read.reverse_complement();
        added
    }

    /// Extends right then left, then trims back part of any extension that
    /// fell short. Returns the bases kept on the left and right.
    pub fn extend_both(&self, read: &mut Read, left: usize, right: usize, rollback: usize) -> (usize, usize) {
        let mut right_ext = self.extend_read(read, right);
        let mut left_ext = self.extend_left(read, left);

        let right_mod = rollback_amount(read.numeric_id, right_ext, right, rollback);
        let left_mod = rollback_amount(read.numeric_id, left_ext, left, rollback);
        right_ext -= right_mod;
        left_ext -= left_mod;
        read.trim_right(right_mod);
        read.trim_left(left_mod);
        (left_ext, right_ext)
    }

    /// A read is junk when it is shorter than k or neither end connects to
    /// any neighbor in the graph.
    pub fn is_junk(&self, read: &Read) -> bool {
        let k = K::k();
        if read.len() < k {
            return true;
        }
        let mut counts = [0u32; 4];
        let left_open = kmer_at::<K>(&read.bases, 0).is_some_and(|kmer| {
            let best = self.store.fill_left_counts(&kmer, &mut counts);
            counts[best] > 0
        });
        if left_open {
            return false;
        }
        let right_open = kmer_at::<K>(&read.bases, read.len() - k).is_some_and(|kmer| {
            let best = self.store.fill_right_counts(&kmer, &mut counts);
            counts[best] > 0
        });
        !right_open
    }

    /// True when at least `fraction` of the read's k-mers, and at least one,
    /// have a count of `count` or less. Windows holding N count as zero.
    pub fn has_kmers_at_or_below(&self, read: &Read, count: u32, fraction: f64) -> bool {
        let k = K::k();
        if read.len() < k {
            return false;
        }
        let windows = read.len() - k + 1;
        let limit = ((windows as f64 * fraction).round() as usize).max(1);
        let mut low = 0;
        for kmer in read_kmers::<K>(&read.bases) {
            if kmer.map_or(0, |k| self.store.count(&k)) <= count {
                low += 1;
                if low >= limit {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::KmerType;
    use crate::kmer_table::KmerTable;
    use crate::test_utils::{random_dna, table_from};

    fn k() -> usize {
        KmerType::k()
    }

    fn extender(table: &KmerTable<KmerType>) -> ReadExtender<'_, KmerType, KmerTable<KmerType>> {
        ReadExtender::new(table, ExtendConfig::default()).unwrap()
    }

    #[test]
    fn extends_right_within_distance() {
        let genome = random_dna(50, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let ext = extender(&table);

        let mut read = Read::new("r", 0, genome[..60].to_vec(), Some(vec![35; 60]));
        assert_eq!(ext.extend_read(&mut read, 50), 50);
        assert_eq!(read.bases, genome[..110].to_vec());
        let quals = read.quals.unwrap();
        assert_eq!(quals.len(), 110);
        assert_eq!(quals[59], 35);
        assert_eq!(quals[60], 30);
    }

    #[test]
    fn extension_stops_at_dead_end() {
        let genome = random_dna(51, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let ext = extender(&table);

        let mut read = Read::new("r", 0, genome[100..].to_vec(), None);
        assert_eq!(ext.extend_read(&mut read, 50), 0);
        assert_eq!(read.bases, genome[100..].to_vec());

        let mut short = Read::new("s", 0, genome[..k() - 1].to_vec(), None);
        assert_eq!(ext.extend_read(&mut short, 50), 0);
    }

    #[test]
    fn extends_left_through_reverse_complement() {
        let genome = random_dna(52, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let ext = extender(&table);

        let mut read = Read::new("r", 0, genome[100..160].to_vec(), Some(vec![35; 60]));
        assert_eq!(ext.extend_left(&mut read, 30), 30);
        assert_eq!(read.bases, genome[70..160].to_vec());
        assert_eq!(read.quality(0), Some(30));
        assert_eq!(read.quality(30), Some(35));
    }

    #[test]
    fn short_extensions_are_rolled_back_by_id() {
        assert_eq!(rollback_amount(7, 40, 100, 3), 3);
        assert_eq!(rollback_amount(8, 40, 100, 3), 0);
        assert_eq!(rollback_amount(7, 2, 100, 3), 2);
        assert_eq!(rollback_amount(7, 100, 100, 3), 0);
        assert_eq!(rollback_amount(7, 40, 100, 0), 0);

        let genome = random_dna(53, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let ext = extender(&table);
        let mut read = Read::new("r", 7, genome[100..160].to_vec(), None);
        // 40 bases remain to the right and 100 to the left
        let (left, right) = ext.extend_both(&mut read, 150, 100, 3);
        assert_eq!(right, 37);
        assert_eq!(left, 97);
        assert_eq!(read.bases, genome[3..197].to_vec());
    }

    #[test]
    fn junk_reads_do_not_touch_the_graph() {
        let genome = random_dna(54, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let ext = extender(&table);

        assert!(!ext.is_junk(&Read::new("in", 0, genome[50..120].to_vec(), None)));
        // the left end alone connects
        assert!(!ext.is_junk(&Read::new("end", 0, genome[150..].to_vec(), None)));
        assert!(ext.is_junk(&Read::new("away", 0, random_dna(55, 70), None)));
        assert!(ext.is_junk(&Read::new("short", 0, genome[..10].to_vec(), None)));
    }

    #[test]
    fn low_depth_fraction() {
        let genome = random_dna(56, 200);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..100], 10), (&genome[100..], 2)]);
        let ext = extender(&table);

        let deep = Read::new("d", 0, genome[..80].to_vec(), None);
        let shallow = Read::new("s", 0, genome[120..].to_vec(), None);
        assert!(!ext.has_kmers_at_or_below(&deep, 2, 0.5));
        assert!(ext.has_kmers_at_or_below(&shallow, 2, 0.5));
        // one low k-mer is enough with a zero fraction
        let mut spotted = genome[..80].to_vec();
        spotted[40] = b'N';
        assert!(ext.has_kmers_at_or_below(&Read::new("n", 0, spotted, None), 2, 0.0));
    }
}
