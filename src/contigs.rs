// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Contig assembly over a shaved store.
//!
//! Workers pull buckets from a shared cursor like the shaver does. Each
//! unclaimed seed is extended right, flipped and extended right again. The
//! whole span is then claimed exclusively in canonical k-mer order and
//! promoted to `Keep`, so two threads never emit overlapping contigs and a
//! lost race is retried rather than dropped.

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Error;
use crossbeam_utils::thread;
use debruijn::{Kmer, Mer};
use log::{debug, info};

use crate::config::{BuildConfig, ExtendConfig};
use crate::dna::{canonical, codes_to_ascii, path_kmers, reverse_complement_codes};
use crate::kmer_table::{Bucket, KmerStore, Status};
use crate::walker::GraphWalker;
use crate::work_queue::WorkQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// One pass seeded at `min_count_seed`.
    Single,
    /// Passes with geometrically falling seed thresholds, deepest first.
    Tiered,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Contig {
    pub id: usize,
    pub bases: Vec<u8>,
    /// Mean k-mer count.
    pub coverage: f64,
}

impl Contig {
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContigSet {
    pub contigs: Vec<Contig>,
    /// Spans claimed but too short or too shallow to emit.
    pub rejected: usize,
    /// Claims lost to a concurrent builder and retried.
    pub collisions: usize,
}

impl ContigSet {
    fn merge(&mut self, other: ContigSet) {
        self.contigs.extend(other.contigs);
        self.rejected += other.rejected;
        self.collisions += other.collisions;
    }

    /// Longest first, ties by sequence, then numbered from zero.
    fn finish(&mut self) {
        self.contigs
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.bases.cmp(&b.bases)));
        for (i, contig) in self.contigs.iter_mut().enumerate() {
            contig.id = i;
        }
    }

    pub fn total_length(&self) -> usize {
        self.contigs.iter().map(Contig::len).sum()
    }
}

/// Seed thresholds for a tiered build: `min_seed * mult^i` (and at least
/// `min_seed + i`) for i from `passes - 1` down to 1, then `min_seed`.
pub fn tier_thresholds(min_seed: u32, passes: usize, mult: f64) -> Vec<u32> {
    let mut thresholds: Vec<u32> = (1..passes)
        .rev()
        .map(|i| {
            let scaled = (f64::from(min_seed) * mult.powi(i as i32)).floor();
            let scaled = scaled.min(f64::from(u32::MAX)) as u32;
            scaled.max(min_seed.saturating_add(i as u32))
        })
        .collect();
    thresholds.push(min_seed);
    thresholds
}

struct Builder<'a, K, S> {
    walker: GraphWalker<'a, K, S>,
    extend: &'a ExtendConfig,
    config: &'a BuildConfig,
    threshold: u32,
    path: Vec<u8>,
    visited: HashSet<K>,
    result: ContigSet,
}

impl<'a, K: Kmer, S: KmerStore<K>> Builder<'a, K, S> {
    fn process_bucket(&mut self, bucket: &Bucket<K>) {
        for cell in 0..bucket.array_length() {
            if let Some(&kmer) = bucket.cell_kmer(cell) {
                if bucket.cell_owner(cell) != Status::Keep && bucket.read_cell_value(cell) >= self.threshold {
                    self.build_from_seed(kmer);
                }
            }
        }
        for node in bucket.victims().walk() {
            if node.owner() != Status::Keep && node.count() >= self.threshold {
                self.build_from_seed(*node.pivot());
            }
        }
    }

    /// Spells the unbranched span through `seed` into `self.path`. K-mers
    /// held `Explored` by an in-flight claim are walked through; finished
    /// contigs (`Keep`) are not.
    fn walk_from(&mut self, seed: K) {
        let store = self.walker.store();
        self.path.clear();
        self.path.extend((0..K::k()).map(|i| seed.get(i)));
        self.visited.clear();
        self.visited.insert(canonical(&seed));

        let extend = self.extend;
        let max_len = self.config.max_contig_len;
        for _ in 0..2 {
            let visited = &mut self.visited;
            let budget = max_len.saturating_sub(self.path.len());
            self.walker.extend_right(&mut self.path, budget, extend, |next| {
                store.owner(next) != Status::Keep && visited.insert(canonical(next))
            });
            reverse_complement_codes(&mut self.path);
        }
    }

    /// Claims the span through `seed` `Explored` and then promotes it to
    /// `Keep`. A lost claim is retried until the seed ends up in a finished
    /// contig, ours or another thread's.
    fn build_from_seed(&mut self, seed: K) {
        let store = self.walker.store();
        loop {
            if store.owner(&seed) == Status::Keep {
                return;
            }
            self.walk_from(seed);
            if store.claim_exclusive(&self.path, Status::Explored) {
                break;
            }
            self.result.collisions += 1;
        }
        let promoted = store.claim(&self.path, Status::Keep, false);
        assert!(promoted, "failed to promote an exclusively held contig");

        let (total, kmers) = path_kmers::<K>(&self.path)
            .fold((0u64, 0u64), |(t, n), kmer| (t + u64::from(store.count(&kmer)), n + 1));
        let coverage = total as f64 / kmers.max(1) as f64;
        if self.path.len() < self.config.min_contig_len || coverage < f64::from(self.config.min_coverage) {
            self.result.rejected += 1;
            return;
        }
        self.result.contigs.push(Contig {
            id: 0,
            bases: codes_to_ascii(&self.path),
            coverage,
        });
    }
}

/// Builds contigs from every unclaimed seed of a store.
pub struct ContigBuilder {
    config: BuildConfig,
    extend: ExtendConfig,
}

impl ContigBuilder {
    pub fn new(config: BuildConfig, extend: ExtendConfig) -> Result<Self, Error> {
        config.validate()?;
        extend.validate()?;
        Ok(ContigBuilder { config, extend })
    }

    /// One parallel pass over all buckets with seeds at or above `threshold`.
    fn build_pass<K, S>(&self, store: &S, threshold: u32) -> ContigSet
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let num_buckets = store.bucket_count();
        let queue = &WorkQueue::new();
        let config = &self.config;
        let extend = &self.extend;

        let per_thread: Vec<ContigSet> = thread::scope(|scope| {
            let handles: Vec<_> = (0..config.threads)
                .map(|_| {
                    scope.spawn(move |_| {
                        let mut builder = Builder {
                            walker: GraphWalker::new(store),
                            extend,
                            config,
                            threshold,
                            path: Vec::new(),
                            visited: HashSet::new(),
                            result: ContigSet::default(),
                        };
                        while let Some(i) = queue.get_work(num_buckets) {
                            builder.process_bucket(store.bucket(i));
                        }
                        builder.result
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
        .unwrap_or_else(|e| std::panic::resume_unwind(e));

        let mut set = ContigSet::default();
        for part in per_thread {
            set.merge(part);
        }
        set
    }

    /// Builds contigs and claims their k-mers `Keep`. Contigs come back
    /// longest first and numbered in that order.
    pub fn build_contigs<K, S>(&self, store: &S, mode: BuildMode) -> ContigSet
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let thresholds = match mode {
            BuildMode::Single => vec![self.config.min_count_seed],
            BuildMode::Tiered => tier_thresholds(
                self.config.min_count_seed,
                self.config.contig_passes,
                self.config.contig_pass_mult,
            ),
        };

        let start = Instant::now();
        let mut set = ContigSet::default();
        for threshold in thresholds {
            let pass = self.build_pass(store, threshold);
            debug!(
                "Seed threshold {}: {} contigs, {} rejected, {} collisions",
                threshold,
                pass.contigs.len(),
                pass.rejected,
                pass.collisions
            );
            set.merge(pass);
        }
        set.finish();

        info!(
            "Built {} contigs totalling {} bp in {:?}",
            set.contigs.len(),
            set.total_length(),
            start.elapsed()
        );
        set
    }
}
