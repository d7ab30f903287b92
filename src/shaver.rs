// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Concurrent removal of dead-end tips and bubble arms.
//!
//! Shaving runs in two barrier-separated phases. In the explore phase
//! workers pull bucket indices from a shared cursor and classify the
//! unbranched path through every unexplored seed, tagging it `Explored` or
//! `Remove` with a single all-or-nothing claim. In the apply phase every
//! bucket zeroes its `Remove` entries, clears tags and compacts.

use std::time::Instant;

use anyhow::Error;
use crossbeam_utils::thread;
use debruijn::{Kmer, Mer};
use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;

use crate::config::{ShaveConfig, DEFAULT_BUCKETS, MAX_SHAVE_ROUNDS, SHAVE_ROUND_MIN_REMOVED};
use crate::dna::{last_kmer, path_kmers, reverse_complement_codes};
use crate::kmer_table::{Bucket, KmerCounter, KmerStore, KmerTable, Status};
use crate::walker::{GraphWalker, Termination, WalkLimits, WalkResult};
use crate::work_queue::WorkQueue;

type Matrix = [[u64; Termination::COUNT]; Termination::COUNT];

/// Counters from one shave, summed over workers after the explore barrier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaveStats {
    pub kmers_tested: u64,
    pub tips_found: u64,
    pub bubbles_found: u64,
    pub kmers_removed: usize,
    /// Termination codes (a, b) of every explored path.
    pub count_matrix: Matrix,
    /// Termination codes (a, b) of every removed path.
    pub remove_matrix: Matrix,
}

impl ShaveStats {
    pub fn merge(&mut self, other: &ShaveStats) {
        self.kmers_tested += other.kmers_tested;
        self.tips_found += other.tips_found;
        self.bubbles_found += other.bubbles_found;
        self.kmers_removed += other.kmers_removed;
        for (a, b) in self.count_matrix.iter_mut().zip(&other.count_matrix) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
        for (a, b) in self.remove_matrix.iter_mut().zip(&other.remove_matrix) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
    }

    fn log_matrix(name: &str, matrix: &Matrix) {
        debug!(
            "{} matrix:\n\t{}",
            name,
            Termination::ALL.iter().map(|t| t.name()).join("\t")
        );
        for (code, row) in Termination::ALL.iter().zip(matrix) {
            debug!("{}\t{}", code.name(), row.iter().join("\t"));
        }
    }
}

enum Decision {
    Keep,
    RemoveTip,
    RemoveBubble,
}

/// Per-thread explorer; owns its walker and path buffers.
struct Explorer<'a, K, S> {
    walker: GraphWalker<'a, K, S>,
    limits: WalkLimits,
    min_seed: u32,
    max_length_to_discard: usize,
    remove_hair: bool,
    remove_bubbles: bool,
    path: Vec<u8>,
    sibling: Vec<u8>,
    stats: ShaveStats,
}

impl<'a, K: Kmer, S: KmerStore<K>> Explorer<'a, K, S> {
    fn new(store: &'a S, config: &ShaveConfig, remove_hair: bool, remove_bubbles: bool) -> Self {
        Explorer {
            walker: GraphWalker::new(store),
            limits: WalkLimits {
                min_count: config.min_count,
                max_count: config.max_count,
                max_length: config.max_distance_to_explore,
            },
            min_seed: config.min_seed,
            max_length_to_discard: config.max_length_to_discard,
            remove_hair,
            remove_bubbles,
            path: Vec::new(),
            sibling: Vec::new(),
            stats: ShaveStats::default(),
        }
    }

    fn process_bucket(&mut self, bucket: &Bucket<K>) {
        for cell in 0..bucket.array_length() {
            if let Some(&kmer) = bucket.cell_kmer(cell) {
                self.process_seed(kmer, bucket.read_cell_value(cell), bucket.cell_owner(cell));
            }
        }
        self.process_victims(bucket);
    }

    fn process_victims(&mut self, bucket: &Bucket<K>) {
        for node in bucket.victims().walk() {
            self.process_seed(*node.pivot(), node.count(), node.owner());
        }
    }

    fn process_seed(&mut self, kmer: K, count: u32, owner: Status) {
        if owner == Status::Unexplored && count >= self.min_seed && count <= self.limits.max_count {
            self.explore_and_mark(kmer);
        }
    }

    /// Classifies both ends of the path through `seed` and claims it.
    /// Returns true when the path was marked for removal.
    fn explore_and_mark(&mut self, seed: K) -> bool {
        let store = self.walker.store();
        if store.owner(&seed) > Status::Unexplored {
            return false;
        }

        self.path.clear();
        self.path.extend((0..K::k()).map(|i| seed.get(i)));
        let a = self.walker.explore(&mut self.path, &self.limits);
        reverse_complement_codes(&mut self.path);
        let b = self.walker.explore(&mut self.path, &self.limits);

        self.stats.kmers_tested += 1;
        self.stats.count_matrix[a.code.index()][b.code.index()] += 1;

        match self.decide(&a, &b) {
            Decision::Keep => {
                store.claim(&self.path, Status::Explored, true);
                false
            }
            decision => {
                let claimed = store.claim(&self.path, Status::Remove, false);
                assert!(claimed, "failed to claim a path for removal during shaving");
                self.stats.remove_matrix[a.code.index()][b.code.index()] += 1;
                match decision {
                    Decision::RemoveTip => self.stats.tips_found += 1,
                    _ => self.stats.bubbles_found += 1,
                }
                true
            }
        }
    }

    fn decide(&mut self, a: &WalkResult<K>, b: &WalkResult<K>) -> Decision {
        use Termination::{BackwardBranch, DeadEnd, ForwardBranch, Loop, TooDeep, TooLong};

        let protected = |t: Termination| matches!(t, TooLong | TooDeep | Loop | ForwardBranch);
        if protected(a.code) || protected(b.code) {
            return Decision::Keep;
        }
        if self.path.len() - K::k() > self.max_length_to_discard {
            return Decision::Keep;
        }

        let (min, max) = if a.code <= b.code {
            (a.code, b.code)
        } else {
            (b.code, a.code)
        };
        if self.remove_hair && min == DeadEnd && (max == DeadEnd || max == BackwardBranch) {
            return Decision::RemoveTip;
        }
        if self.remove_bubbles && a.code == BackwardBranch && b.code == BackwardBranch {
            if let Some(junction) = b.blocked_at {
                if self.is_weaker_arm(junction) {
                    return Decision::RemoveBubble;
                }
            }
        }
        Decision::Keep
    }

    /// Compares the current path with the other arm entering `junction`.
    /// Lower mean coverage loses; ties go to the strand-independent sequence
    /// key, so both arms of a bubble reach opposite verdicts.
    fn is_weaker_arm(&mut self, junction: K) -> bool {
        let store = self.walker.store();
        let ours: K = last_kmer(&self.path);

        let mut left = [0u32; 4];
        store.fill_left_counts(&junction, &mut left);
        let sibling_end = (0..4u8)
            .map(|code| (code, junction.extend_left(code)))
            .filter(|&(code, kmer)| left[code as usize] > 0 && kmer != ours)
            .max_by_key(|&(code, _)| (left[code as usize], std::cmp::Reverse(code)))
            .map(|(_, kmer)| kmer);
        let sibling_end = match sibling_end {
            Some(kmer) => kmer,
            None => return false,
        };

        self.sibling.clear();
        let start = sibling_end.rc();
        self.sibling.extend((0..K::k()).map(|i| start.get(i)));
        self.walker.explore(&mut self.sibling, &self.limits);

        let ours = ArmScore::new::<K, S>(store, &self.path);
        let theirs = ArmScore::new::<K, S>(store, &self.sibling);
        ours < theirs
    }
}

/// Mean coverage of an arm, then its lexicographically smaller strand.
#[derive(PartialEq, Eq)]
struct ArmScore {
    total: u64,
    kmers: u64,
    key: Vec<u8>,
}

impl ArmScore {
    fn new<K: Kmer, S: KmerStore<K>>(store: &S, path: &[u8]) -> Self {
        let (total, kmers) = path_kmers::<K>(path)
            .fold((0u64, 0u64), |(t, n), kmer| (t + store.count(&kmer) as u64, n + 1));
        let mut rc = path.to_vec();
        reverse_complement_codes(&mut rc);
        ArmScore {
            total,
            kmers,
            key: rc.min(path.to_vec()),
        }
    }
}

impl PartialOrd for ArmScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArmScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // compare means without dividing
        (self.total * other.kmers)
            .cmp(&(other.total * self.kmers))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Tip and bubble remover over a whole `KmerStore`.
pub struct Shaver {
    config: ShaveConfig,
}

impl Shaver {
    pub fn new(config: ShaveConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Shaver { config })
    }

    /// Explore phase: tags every reachable seed path `Explored` or `Remove`.
    /// Counts are left untouched until `apply`.
    pub fn explore<K, S>(&self, store: &S, remove_hair: bool, remove_bubbles: bool) -> ShaveStats
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let num_buckets = store.bucket_count();
        let table_queue = &WorkQueue::new();
        let victim_queue = &WorkQueue::new();
        let config = &self.config;

        let per_thread: Vec<ShaveStats> = thread::scope(|scope| {
            let handles: Vec<_> = (0..config.threads)
                .map(|_| {
                    scope.spawn(move |_| {
                        let mut explorer = Explorer::new(store, config, remove_hair, remove_bubbles);
                        while let Some(i) = table_queue.get_work(num_buckets) {
                            explorer.process_bucket(store.bucket(i));
                        }
                        while let Some(i) = victim_queue.get_work(num_buckets) {
                            explorer.process_victims(store.bucket(i));
                        }
                        explorer.stats
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
        .unwrap_or_else(|e| std::panic::resume_unwind(e));

        let mut stats = ShaveStats::default();
        for s in &per_thread {
            stats.merge(s);
        }
        stats
    }

    /// Apply phase: zeroes `Remove` k-mers, clears tags and compacts every
    /// bucket. Returns the number of k-mers removed.
    pub fn apply<K, S>(&self, store: &mut S) -> Result<usize, Error>
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        let buckets = store.buckets_mut();
        let removed = pool.install(|| {
            buckets
                .par_iter_mut()
                .map(Bucket::apply_removals)
                .sum()
        });
        Ok(removed)
    }

    pub fn shave_with_stats<K, S>(
        &self,
        store: &mut S,
        remove_hair: bool,
        remove_bubbles: bool,
    ) -> Result<ShaveStats, Error>
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let start = Instant::now();
        let mut stats = self.explore(&*store, remove_hair, remove_bubbles);
        debug!("Shave explore phase took {:?}", start.elapsed());

        let start = Instant::now();
        stats.kmers_removed = self.apply(store)?;
        debug!("Shave apply phase took {:?}", start.elapsed());

        info!(
            "Shaved {} k-mers: {} tips, {} bubbles from {} paths tested",
            stats.kmers_removed, stats.tips_found, stats.bubbles_found, stats.kmers_tested
        );
        ShaveStats::log_matrix("Explored", &stats.count_matrix);
        ShaveStats::log_matrix("Removed", &stats.remove_matrix);
        Ok(stats)
    }

    /// Explore + apply cycles until a cycle removes nothing, so paths
    /// exposed by one removal are judged again. Returns the number of
    /// k-mers removed.
    pub fn shave<K, S>(&self, store: &mut S, remove_hair: bool, remove_bubbles: bool) -> Result<usize, Error>
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let mut total = 0;
        loop {
            let removed = self.shave_with_stats(store, remove_hair, remove_bubbles)?.kmers_removed;
            if removed == 0 {
                return Ok(total);
            }
            total += removed;
        }
    }

    /// Repeated shaving with a rising seed floor, one round per depth up to
    /// `max_count`. Stops once a round removes little.
    pub fn shave_rounds<K, S>(&self, store: &mut S, remove_hair: bool, remove_bubbles: bool) -> Result<usize, Error>
    where
        K: Kmer + Send + Sync,
        S: KmerStore<K>,
    {
        let rounds = (self.config.max_count as usize).min(MAX_SHAVE_ROUNDS);
        let mut total = 0;
        for round in 0..rounds {
            let shaver = Shaver {
                config: ShaveConfig {
                    min_seed: round as u32 + 1,
                    ..self.config.clone()
                },
            };
            let removed = shaver.shave(store, remove_hair, remove_bubbles)?;
            total += removed;
            if removed < SHAVE_ROUND_MIN_REMOVED {
                break;
            }
        }
        info!("Shaving removed {} k-mers in total", total);
        Ok(total)
    }
}

/// Counts the k-mers of `seqs`, drops those seen fewer than `min_count`
/// times and, given a shaver, shaves the table in rounds.
pub fn count_and_shave<K>(seqs: &[&[u8]], min_count: u32, shaver: Option<&Shaver>) -> Result<KmerTable<K>, Error>
where
    K: Kmer + Send + Sync,
{
    let counter = KmerCounter::<K>::new();
    counter.add_sequences(seqs);
    info!("Counted {} distinct k-mers", counter.len());
    let mut table = counter.into_table(DEFAULT_BUCKETS, min_count);

    if let Some(shaver) = shaver {
        shaver.shave_rounds(&mut table, true, true)?;
    }
    info!("Table holds {} k-mers", table.len());
    Ok(table)
}
