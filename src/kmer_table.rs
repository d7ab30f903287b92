// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! K-mer count table backing the implicit de Bruijn graph.
//!
//! Nodes are canonical k-mers, edges are never stored: the neighbors of a
//! k-mer are found by looking up its four one-base extensions. Every entry
//! carries an atomic ownership tag so concurrent walkers can claim whole
//! paths without locks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};

use dashmap::DashMap;
use debruijn::Kmer;
use itertools::Itertools;
use log::info;
use rayon::prelude::*;

use crate::config::{MIN_ARRAY_LEN, PROBE_LIMIT};
use crate::dna::{canonical, path_kmers, read_kmers};

/// Ownership tag of a k-mer. Tags only ever rise while a phase runs and
/// are reset to `Unexplored` between phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    Unexplored = 0,
    Explored = 1,
    Remove = 2,
    Keep = 3,
}

impl Status {
    pub fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Unexplored,
            1 => Status::Explored,
            2 => Status::Remove,
            _ => Status::Keep,
        }
    }
}

fn hash_kmer<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[inline]
fn cell_index(hash: u64, len: usize) -> usize {
    ((hash >> 32) as usize) % len
}

/// Index of the largest count, first one wins ties.
#[inline]
pub fn max_position(counts: &[u32; 4]) -> usize {
    let mut max_pos = 0;
    for (pos, &c) in counts.iter().enumerate().skip(1) {
        if c > counts[max_pos] {
            max_pos = pos;
        }
    }
    max_pos
}

/// Second largest count; equals the largest when two neighbors tie.
#[inline]
pub fn second_highest(counts: &[u32; 4]) -> u32 {
    let max_pos = max_position(counts);
    counts
        .iter()
        .enumerate()
        .filter(|&(pos, _)| pos != max_pos)
        .map(|(_, &c)| c)
        .max()
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Cell(usize),
    Victim(usize),
}

/// Overflow entry for k-mers that found no free cell within the probe limit.
#[derive(Debug)]
pub struct VictimNode<K> {
    pivot: K,
    count: u32,
    owner: AtomicU8,
    left: Option<usize>,
    right: Option<usize>,
}

impl<K> VictimNode<K> {
    pub fn pivot(&self) -> &K {
        &self.pivot
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn owner(&self) -> Status {
        Status::from_u8(self.owner.load(Ordering::Acquire))
    }

    pub fn left(&self) -> Option<usize> {
        self.left
    }

    pub fn right(&self) -> Option<usize> {
        self.right
    }
}

/// Binary search tree of victims, linked by index into a node vector.
#[derive(Debug)]
pub struct VictimTree<K> {
    nodes: Vec<VictimNode<K>>,
    root: Option<usize>,
}

impl<K: Kmer> VictimTree<K> {
    fn empty() -> Self {
        VictimTree {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Builds a balanced tree from entries sorted by k-mer.
    fn from_sorted(entries: &[(K, u32)]) -> Self {
        let mut tree = VictimTree {
            nodes: Vec::with_capacity(entries.len()),
            root: None,
        };
        // medians first, so every subtree is balanced
        let mut ranges = vec![(0, entries.len())];
        while let Some((lo, hi)) = ranges.pop() {
            if lo >= hi {
                continue;
            }
            let mid = (lo + hi) / 2;
            tree.insert(entries[mid].0, entries[mid].1);
            ranges.push((mid + 1, hi));
            ranges.push((lo, mid));
        }
        tree
    }

    fn insert(&mut self, pivot: K, count: u32) {
        let id = self.nodes.len();
        match self.root {
            None => self.root = Some(id),
            Some(mut cur) => loop {
                let node = &mut self.nodes[cur];
                let link = if pivot < node.pivot {
                    &mut node.left
                } else {
                    &mut node.right
                };
                match *link {
                    Some(next) => cur = next,
                    None => {
                        *link = Some(id);
                        break;
                    }
                }
            },
        }
        self.nodes.push(VictimNode {
            pivot,
            count,
            owner: AtomicU8::new(Status::Unexplored as u8),
            left: None,
            right: None,
        });
    }

    fn find(&self, key: &K) -> Option<usize> {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            cur = match key.cmp(&node.pivot) {
                std::cmp::Ordering::Less => node.left,
                std::cmp::Ordering::Greater => node.right,
                std::cmp::Ordering::Equal => return Some(id),
            };
        }
        None
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn node(&self, id: usize) -> &VictimNode<K> {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order traversal using an explicit stack.
    pub fn walk(&self) -> VictimWalk<'_, K> {
        VictimWalk {
            tree: self,
            stack: self.root.into_iter().collect(),
        }
    }
}

pub struct VictimWalk<'a, K> {
    tree: &'a VictimTree<K>,
    stack: Vec<usize>,
}

impl<'a, K> Iterator for VictimWalk<'a, K> {
    type Item = &'a VictimNode<K>;

    fn next(&mut self) -> Option<&'a VictimNode<K>> {
        let id = self.stack.pop()?;
        let node = &self.tree.nodes[id];
        self.stack.extend(node.right);
        self.stack.extend(node.left);
        Some(node)
    }
}

/// One partition of the table: an open-addressed primary array plus the
/// victim tree for entries that overflowed it.
#[derive(Debug)]
pub struct Bucket<K> {
    keys: Vec<Option<K>>,
    counts: Vec<u32>,
    owners: Vec<AtomicU8>,
    victims: VictimTree<K>,
}

impl<K: Kmer> Bucket<K> {
    /// Builds a bucket from canonical entries. Duplicate keys are summed.
    fn build(mut entries: Vec<(K, u32)>) -> Self {
        entries.sort_unstable_by_key(|e| e.0);
        let entries: Vec<(K, u32)> = entries
            .into_iter()
            .coalesce(|a, b| {
                if a.0 == b.0 {
                    Ok((a.0, a.1 + b.1))
                } else {
                    Err((a, b))
                }
            })
            .collect();

        let len = MIN_ARRAY_LEN.max(entries.len() * 4 / 3 + 1);
        let mut bucket = Bucket {
            keys: vec![None; len],
            counts: vec![0; len],
            owners: (0..len)
                .map(|_| AtomicU8::new(Status::Unexplored as u8))
                .collect(),
            victims: VictimTree::empty(),
        };

        let mut overflow = Vec::new();
        for (key, count) in entries {
            if !bucket.insert_cell(key, count, hash_kmer(&key)) {
                overflow.push((key, count));
            }
        }
        bucket.victims = VictimTree::from_sorted(&overflow);
        bucket
    }

    fn insert_cell(&mut self, key: K, count: u32, hash: u64) -> bool {
        let len = self.keys.len();
        let start = cell_index(hash, len);
        for probe in 0..PROBE_LIMIT.min(len) {
            let cell = (start + probe) % len;
            if self.keys[cell].is_none() {
                self.keys[cell] = Some(key);
                self.counts[cell] = count;
                return true;
            }
        }
        false
    }

    fn find(&self, key: &K, hash: u64) -> Option<Slot> {
        let len = self.keys.len();
        let start = cell_index(hash, len);
        for probe in 0..PROBE_LIMIT.min(len) {
            let cell = (start + probe) % len;
            match &self.keys[cell] {
                Some(k) if k == key => return Some(Slot::Cell(cell)),
                Some(_) => (),
                // cells are never vacated, so an empty cell ends the probe
                None => return None,
            }
        }
        self.victims.find(key).map(Slot::Victim)
    }

    fn slot_count(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Cell(cell) => self.counts[cell],
            Slot::Victim(id) => self.victims.nodes[id].count,
        }
    }

    fn slot_owner(&self, slot: Slot) -> &AtomicU8 {
        match slot {
            Slot::Cell(cell) => &self.owners[cell],
            Slot::Victim(id) => &self.victims.nodes[id].owner,
        }
    }

    pub fn array_length(&self) -> usize {
        self.keys.len()
    }

    pub fn read_cell_value(&self, cell: usize) -> u32 {
        self.counts[cell]
    }

    pub fn cell_owner(&self, cell: usize) -> Status {
        Status::from_u8(self.owners[cell].load(Ordering::Acquire))
    }

    pub fn cell_kmer(&self, cell: usize) -> Option<&K> {
        self.keys[cell].as_ref()
    }

    pub fn victims(&self) -> &VictimTree<K> {
        &self.victims
    }

    /// Number of k-mers held in cells and victims.
    pub fn len(&self) -> usize {
        self.keys.iter().filter(|k| k.is_some()).count() + self.victims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_ownership(&self) {
        for owner in &self.owners {
            owner.store(Status::Unexplored as u8, Ordering::Release);
        }
        for node in &self.victims.nodes {
            node.owner.store(Status::Unexplored as u8, Ordering::Release);
        }
    }

    /// Zeroes every `Remove` entry, clears all tags and compacts the bucket.
    /// Returns the number of k-mers dropped.
    pub fn apply_removals(&mut self) -> usize {
        for (count, owner) in self.counts.iter_mut().zip(&self.owners) {
            if owner.load(Ordering::Acquire) == Status::Remove as u8 {
                *count = 0;
            }
        }
        for node in self.victims.nodes.iter_mut() {
            if node.owner.load(Ordering::Acquire) == Status::Remove as u8 {
                node.count = 0;
            }
        }

        let before = self.len();
        let survivors: Vec<(K, u32)> = self.entries().filter(|&(_, c)| c > 0).collect();
        let removed = before - survivors.len();
        *self = Bucket::build(survivors);
        removed
    }

    /// Every (canonical k-mer, count) pair in the bucket.
    pub fn entries(&self) -> impl Iterator<Item = (K, u32)> + '_ {
        self.keys
            .iter()
            .zip(&self.counts)
            .filter_map(|(k, &c)| k.map(|k| (k, c)))
            .chain(self.victims.nodes.iter().map(|n| (n.pivot, n.count)))
    }
}

/// Lookup, adjacency and ownership over an implicit de Bruijn graph.
///
/// Paths are slices of 2-bit base codes; a path of length `n` covers the
/// `n - k + 1` k-mers it spells.
pub trait KmerStore<K: Kmer>: Sync {
    /// Count of `kmer` in either orientation, zero when absent.
    fn count(&self, kmer: &K) -> u32;

    /// Ownership cell of `kmer` in either orientation.
    fn owner_cell(&self, kmer: &K) -> Option<&AtomicU8>;

    fn bucket_count(&self) -> usize;

    fn bucket(&self, i: usize) -> &Bucket<K>;

    fn buckets_mut(&mut self) -> &mut [Bucket<K>];

    fn owner(&self, kmer: &K) -> Status {
        self.owner_cell(kmer)
            .map_or(Status::Unexplored, |c| Status::from_u8(c.load(Ordering::Acquire)))
    }

    /// Counts of the four successors of `kmer`; returns the index of the max.
    fn fill_right_counts(&self, kmer: &K, counts: &mut [u32; 4]) -> usize {
        for (code, slot) in counts.iter_mut().enumerate() {
            *slot = self.count(&kmer.extend_right(code as u8));
        }
        max_position(counts)
    }

    /// Counts of the four predecessors of `kmer`; returns the index of the max.
    fn fill_left_counts(&self, kmer: &K, counts: &mut [u32; 4]) -> usize {
        for (code, slot) in counts.iter_mut().enumerate() {
            *slot = self.count(&kmer.extend_left(code as u8));
        }
        max_position(counts)
    }

    /// Highest tag held by any k-mer of the path.
    fn find_owner(&self, path: &[u8]) -> Status {
        path_kmers::<K>(path)
            .map(|kmer| self.owner(&kmer))
            .max()
            .unwrap_or(Status::Unexplored)
    }

    /// Raises every k-mer of the path to `tag`. Fails without side effects
    /// when a k-mer is absent or already holds a higher tag. With
    /// `early_exit` the path is checked read-only before any tag moves.
    fn claim(&self, path: &[u8], tag: Status, early_exit: bool) -> bool {
        if early_exit && self.find_owner(path) > tag {
            return false;
        }

        let tag = tag as u8;
        let mut raised: Vec<(&AtomicU8, u8)> = Vec::new();
        for kmer in path_kmers::<K>(path) {
            let cell = match self.owner_cell(&kmer) {
                Some(cell) => cell,
                None => {
                    restore_tags(&raised, tag);
                    return false;
                }
            };

            let mut current = cell.load(Ordering::Acquire);
            while current < tag {
                match cell.compare_exchange_weak(current, tag, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        raised.push((cell, current));
                        break;
                    }
                    Err(actual) => current = actual,
                }
            }

            if current > tag {
                restore_tags(&raised, tag);
                return false;
            }
        }
        true
    }

    /// Moves every k-mer of the path from `Unexplored` to `tag`. Fails, and
    /// restores what it took, if any k-mer was owned by someone else.
    /// K-mers are taken in canonical order, so of two racing claims over
    /// the same span one always completes.
    fn claim_exclusive(&self, path: &[u8], tag: Status) -> bool {
        let mut kmers: Vec<K> = path_kmers::<K>(path).map(|kmer| canonical(&kmer)).collect();
        kmers.sort_unstable();
        kmers.dedup();

        let tag = tag as u8;
        let unexplored = Status::Unexplored as u8;
        let mut taken: Vec<&AtomicU8> = Vec::with_capacity(kmers.len());
        for kmer in &kmers {
            let cell = match self.owner_cell(kmer) {
                Some(cell) => cell,
                None => {
                    release_taken(&taken);
                    return false;
                }
            };
            if cell
                .compare_exchange(unexplored, tag, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                release_taken(&taken);
                return false;
            }
            taken.push(cell);
        }
        true
    }

    /// Returns every k-mer of the path held at `tag` to `Unexplored`.
    fn release(&self, path: &[u8], tag: Status) {
        for kmer in path_kmers::<K>(path) {
            if let Some(cell) = self.owner_cell(&kmer) {
                // a lost exchange means another owner holds the k-mer now
                let _ = cell.compare_exchange(
                    tag as u8,
                    Status::Unexplored as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }

    fn clear_ownership(&self) {
        for i in 0..self.bucket_count() {
            self.bucket(i).clear_ownership();
        }
    }
}

fn restore_tags(raised: &[(&AtomicU8, u8)], tag: u8) {
    for &(cell, previous) in raised.iter().rev() {
        // a lost exchange means another owner raised the tag past ours
        let _ = cell.compare_exchange(tag, previous, Ordering::AcqRel, Ordering::Acquire);
    }
}

fn release_taken(taken: &[&AtomicU8]) {
    for cell in taken {
        cell.store(Status::Unexplored as u8, Ordering::Release);
    }
}

/// Canonical k-mer counts partitioned into buckets by hash.
#[derive(Debug)]
pub struct KmerTable<K> {
    buckets: Vec<Bucket<K>>,
}

impl<K: Kmer + Send + Sync> KmerTable<K> {
    /// Builds a table from (k-mer, count) pairs in any orientation.
    pub fn from_counts<I>(counts: I, num_buckets: usize) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
    {
        let num_buckets = num_buckets.max(1);
        let mut groups: Vec<Vec<(K, u32)>> = vec![Vec::new(); num_buckets];
        for (kmer, count) in counts {
            let key = canonical(&kmer);
            let bucket = (hash_kmer(&key) % num_buckets as u64) as usize;
            groups[bucket].push((key, count));
        }

        let buckets: Vec<Bucket<K>> = groups.into_par_iter().map(Bucket::build).collect();
        let table = KmerTable { buckets };
        info!(
            "Built k-mer table: {} k-mers in {} buckets, {} victims",
            table.len(),
            table.buckets.len(),
            table.victim_count()
        );
        table
    }

    fn locate(&self, kmer: &K) -> Option<(&Bucket<K>, Slot)> {
        let key = canonical(kmer);
        let hash = hash_kmer(&key);
        let bucket = &self.buckets[(hash % self.buckets.len() as u64) as usize];
        bucket.find(&key, hash).map(|slot| (bucket, slot))
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn victim_count(&self) -> usize {
        self.buckets.iter().map(|b| b.victims.len()).sum()
    }

    /// Every (canonical k-mer, count) pair in the table.
    pub fn entries(&self) -> impl Iterator<Item = (K, u32)> + '_ {
        self.buckets.iter().flat_map(Bucket::entries)
    }
}

impl<K: Kmer + Send + Sync> KmerStore<K> for KmerTable<K> {
    fn count(&self, kmer: &K) -> u32 {
        self.locate(kmer)
            .map_or(0, |(bucket, slot)| bucket.slot_count(slot))
    }

    fn owner_cell(&self, kmer: &K) -> Option<&AtomicU8> {
        self.locate(kmer)
            .map(|(bucket, slot)| bucket.slot_owner(slot))
    }

    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, i: usize) -> &Bucket<K> {
        &self.buckets[i]
    }

    fn buckets_mut(&mut self) -> &mut [Bucket<K>] {
        &mut self.buckets
    }
}

/// Concurrent canonical k-mer counter feeding a `KmerTable`.
pub struct KmerCounter<K: Kmer> {
    counts: DashMap<K, u32>,
}

impl<K: Kmer + Send + Sync> Default for KmerCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kmer + Send + Sync> KmerCounter<K> {
    pub fn new() -> Self {
        KmerCounter {
            counts: DashMap::new(),
        }
    }

    /// Counts every k-mer of an ASCII sequence; non-ACGT bases break k-mers.
    pub fn add_sequence(&self, bases: &[u8]) {
        self.add_weighted(bases, 1);
    }

    pub fn add_weighted(&self, bases: &[u8], weight: u32) {
        for kmer in read_kmers::<K>(bases).flatten() {
            *self.counts.entry(canonical(&kmer)).or_insert(0) += weight;
        }
    }

    pub fn add_sequences<S: AsRef<[u8]> + Sync>(&self, seqs: &[S]) {
        seqs.par_iter().for_each(|s| self.add_sequence(s.as_ref()));
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Drops k-mers seen fewer than `min_count` times and builds the table.
    pub fn into_table(self, num_buckets: usize, min_count: u32) -> KmerTable<K> {
        let entries: Vec<(K, u32)> = self
            .counts
            .into_iter()
            .filter(|&(_, c)| c >= min_count)
            .collect();
        KmerTable::from_counts(entries, num_buckets)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::KmerType;
    use crate::dna::{ascii_to_codes, kmer_at, last_kmer, reverse_complement_codes};
    use crossbeam_utils::thread;
    use crate::test_utils::{random_dna, table_from};
    use debruijn::Mer;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest::proptest;
    use std::collections::HashMap;

    #[test]
    fn counts_are_strand_independent() {
        let seq = random_dna(7, 60);
        let table: KmerTable<KmerType> = table_from(&[(&seq[..], 4)]);
        let kmer: KmerType = kmer_at(&seq, 10).unwrap();
        assert_eq!(table.count(&kmer), 4);
        assert_eq!(table.count(&kmer.rc()), 4);
        assert_eq!(table.count(&kmer.extend_right(0).extend_right(1)), 0);
    }

    #[test]
    fn right_and_left_counts_follow_the_sequence() {
        let seq = random_dna(11, 80);
        let codes = ascii_to_codes(&seq).unwrap();
        let k = KmerType::k();
        let table: KmerTable<KmerType> = table_from(&[(&seq[..], 5)]);

        let kmer: KmerType = kmer_at(&seq, 3).unwrap();
        let mut counts = [0u32; 4];
        let next = table.fill_right_counts(&kmer, &mut counts);
        assert_eq!(next as u8, codes[3 + k]);
        assert_eq!(counts[next], 5);
        assert_eq!(second_highest(&counts), 0);

        let prev = table.fill_left_counts(&kmer, &mut counts);
        assert_eq!(prev as u8, codes[2]);
    }

    #[test]
    fn position_helpers() {
        assert_eq!(max_position(&[3, 7, 7, 1]), 1);
        assert_eq!(second_highest(&[3, 7, 7, 1]), 7);
        assert_eq!(second_highest(&[0, 9, 2, 1]), 2);
        assert_eq!(max_position(&[0, 0, 0, 0]), 0);
    }

    #[test]
    fn single_bucket_overflows_into_victims() {
        let seqs: Vec<Vec<u8>> = (0..20).map(|i| random_dna(100 + i, 200)).collect();
        let counter = KmerCounter::<KmerType>::new();
        counter.add_sequences(&seqs);
        let expected = counter.len();
        let table = counter.into_table(1, 1);
        assert_eq!(table.len(), expected);
        assert!(table.victim_count() > 0);

        for seq in &seqs {
            for i in 0..=seq.len() - KmerType::k() {
                let kmer: KmerType = kmer_at(seq, i).unwrap();
                assert!(table.count(&kmer) >= 1);
            }
        }
        let walked: usize = (0..table.bucket_count())
            .map(|i| table.bucket(i).victims().walk().count())
            .sum();
        assert_eq!(walked, table.victim_count());
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let seq = random_dna(3, 70);
        let codes = ascii_to_codes(&seq).unwrap();
        let table: KmerTable<KmerType> = table_from(&[(&seq[..], 2)]);

        let head = &codes[..60];
        let tail = &codes[30..];
        assert!(table.claim(tail, Status::Remove, false));

        // overlaps a higher tag, so nothing of the head may stay raised
        assert!(!table.claim(head, Status::Explored, false));
        let first: KmerType = kmer_at(&seq, 0).unwrap();
        assert_eq!(table.owner(&first), Status::Unexplored);
        assert!(!table.claim(head, Status::Explored, true));

        // raising to an equal tag is fine
        assert!(table.claim(tail, Status::Remove, true));
        assert_eq!(table.find_owner(head), Status::Remove);

        table.release(tail, Status::Remove);
        assert_eq!(table.find_owner(&codes), Status::Unexplored);
    }

    #[test]
    fn exclusive_claims_do_not_overlap() {
        let seq = random_dna(5, 90);
        let codes = ascii_to_codes(&seq).unwrap();
        let table: KmerTable<KmerType> = table_from(&[(&seq[..], 2)]);

        assert!(table.claim_exclusive(&codes[40..], Status::Keep));
        assert!(!table.claim_exclusive(&codes[..70], Status::Keep));
        let first: KmerType = kmer_at(&seq, 0).unwrap();
        assert_eq!(table.owner(&first), Status::Unexplored);
        let last: KmerType = last_kmer(&codes);
        assert_eq!(table.owner(&last), Status::Keep);

        table.clear_ownership();
        assert!(table.claim_exclusive(&codes[..70], Status::Keep));
    }

    #[test]
    fn opposite_strand_claims_have_one_winner() {
        let seq = random_dna(12, 200);
        let codes = ascii_to_codes(&seq).unwrap();
        let mut rc = codes.clone();
        reverse_complement_codes(&mut rc);
        let table: KmerTable<KmerType> = table_from(&[(&seq[..], 2)]);

        for _ in 0..50 {
            table.clear_ownership();
            let wins: usize = thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        let path = if i % 2 == 0 { &codes } else { &rc };
                        let table = &table;
                        scope.spawn(move |_| usize::from(table.claim_exclusive(path, Status::Keep)))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).sum()
            })
            .unwrap();
            assert_eq!(wins, 1);
            assert_eq!(table.find_owner(&codes), Status::Keep);
            assert!(path_kmers::<KmerType>(&codes).all(|kmer| table.owner(&kmer) == Status::Keep));
        }
    }

    #[test]
    fn apply_removals_compacts() {
        let seq = random_dna(9, 60);
        let codes = ascii_to_codes(&seq).unwrap();
        let k = KmerType::k();
        let mut table: KmerTable<KmerType> = table_from(&[(&seq[..], 2)]);
        let before = table.len();

        assert!(table.claim(&codes[..k + 4], Status::Remove, false));
        let removed: usize = table
            .buckets_mut()
            .iter_mut()
            .map(Bucket::apply_removals)
            .sum();
        assert_eq!(removed, 5);
        assert_eq!(table.len(), before - 5);

        let first: KmerType = kmer_at(&seq, 0).unwrap();
        let kept: KmerType = kmer_at(&seq, 5).unwrap();
        assert_eq!(table.count(&first), 0);
        assert_eq!(table.count(&kept), 2);
        assert_eq!(table.find_owner(&codes), Status::Unexplored);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 200, .. ProptestConfig::default()})]
        #[test]
        fn table_matches_counts(
            seqs in vec(vec(0..4u8, 24..80usize), 1..20usize),
            buckets in 1..16usize,
        ) {
            let mut expected: HashMap<KmerType, u32> = HashMap::new();
            let counter = KmerCounter::<KmerType>::new();
            for codes in &seqs {
                for kmer in path_kmers::<KmerType>(codes) {
                    *expected.entry(canonical(&kmer)).or_insert(0) += 1;
                }
                counter.add_sequence(&crate::dna::codes_to_ascii(codes));
            }

            let table = counter.into_table(buckets, 1);
            prop_assert_eq!(table.len(), expected.len());
            for (kmer, count) in &expected {
                prop_assert_eq!(table.count(kmer), *count);
                prop_assert_eq!(table.count(&kmer.rc()), *count);
            }
        }
    }
}
