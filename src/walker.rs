// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Deterministic single-path walks over the implicit de Bruijn graph.
//!
//! `explore` classifies how an unbranched path ends, which is what the
//! shaver decides on. `extend_right` is the greedy extension used for
//! contigs and read ends, stopping at junctions judged by `is_junction`.
//!
//! Checks run validate-then-extend: a candidate k-mer is tested for
//! `Loop`, `BackwardBranch`, `ForwardBranch` and `TooDeep` before it joins
//! the path, so a path never contains the k-mer where it branched.
//! `DeadEnd` is tested on the last k-mer already in the path.

use std::marker::PhantomData;

use debruijn::Kmer;

use crate::config::ExtendConfig;
use crate::dna::{canonical, last_kmer};
use crate::kmer_table::{second_highest, KmerStore};

/// How a walk ended. Ordered so that min/max over two ends is meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Termination {
    KeepGoing = 0,
    DeadEnd = 1,
    TooShort = 2,
    TooLong = 3,
    TooDeep = 4,
    ForwardBranch = 5,
    BackwardBranch = 6,
    Loop = 7,
}

impl Termination {
    pub const COUNT: usize = 8;

    pub const ALL: [Termination; Termination::COUNT] = [
        Termination::KeepGoing,
        Termination::DeadEnd,
        Termination::TooShort,
        Termination::TooLong,
        Termination::TooDeep,
        Termination::ForwardBranch,
        Termination::BackwardBranch,
        Termination::Loop,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Termination::KeepGoing => "KEEP_GOING",
            Termination::DeadEnd => "DEAD_END",
            Termination::TooShort => "TOO_SHORT",
            Termination::TooLong => "TOO_LONG",
            Termination::TooDeep => "TOO_DEEP",
            Termination::ForwardBranch => "F_BRANCH",
            Termination::BackwardBranch => "B_BRANCH",
            Termination::Loop => "LOOP",
        }
    }
}

/// Coverage window and distance bound for `explore`.
#[derive(Clone, Copy, Debug)]
pub struct WalkLimits {
    pub min_count: u32,
    pub max_count: u32,
    pub max_length: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkResult<K> {
    pub code: Termination,
    /// The k-mer the walk refused to enter, for branch, depth and loop stops.
    pub blocked_at: Option<K>,
}

impl<K> WalkResult<K> {
    fn stop(code: Termination) -> Self {
        WalkResult {
            code,
            blocked_at: None,
        }
    }

    fn blocked(code: Termination, kmer: K) -> Self {
        WalkResult {
            code,
            blocked_at: Some(kmer),
        }
    }
}

/// Why `extend_right` stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendStop {
    /// The path's last k-mer is missing or too shallow to extend from.
    BadSeed,
    DeadEnd,
    RightBranch,
    LeftBranch,
    /// The caller's acceptance test refused the next k-mer.
    Rejected,
    Limit,
}

/// A branch is real unless the second neighbor is negligible next to the
/// first, either by ratio or by the low-count floor.
pub fn is_junction(max: u32, second: u32, config: &ExtendConfig) -> bool {
    if second < 1 || (second as f32) * config.branch_mult1 < max as f32 {
        return false;
    }
    if second <= config.branch_lower_const
        && max as f32 >= (config.min_count_extend as f32).max(second as f32 * config.branch_mult2)
    {
        return false;
    }
    true
}

/// Walker with its own neighbor-count scratch; one per thread.
pub struct GraphWalker<'a, K, S> {
    store: &'a S,
    left: [u32; 4],
    right: [u32; 4],
    phantom: PhantomData<K>,
}

impl<'a, K: Kmer, S: KmerStore<K>> GraphWalker<'a, K, S> {
    pub fn new(store: &'a S) -> Self {
        GraphWalker {
            store,
            left: [0; 4],
            right: [0; 4],
            phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Walks right from the last k-mer of `path`, appending bases until a
    /// terminal condition. `path` holds 2-bit codes and at least k of them.
    pub fn explore(&mut self, path: &mut Vec<u8>, limits: &WalkLimits) -> WalkResult<K> {
        let max_length = limits.max_length + K::k();
        let mut kmer: K = last_kmer(path);
        let seed = canonical(&kmer);
        let mut count = self.store.count(&kmer);
        let mut max_pos = self.store.fill_right_counts(&kmer, &mut self.right);

        while path.len() <= max_length {
            let right_max = self.right[max_pos];
            if right_max < limits.min_count {
                return WalkResult::stop(Termination::DeadEnd);
            }
            let right_second = second_highest(&self.right);

            let prev_count = count;
            let next = kmer.extend_right(max_pos as u8);
            if canonical(&next) == seed {
                return WalkResult::blocked(Termination::Loop, next);
            }
            count = right_max;

            let left_pos = self.store.fill_left_counts(&next, &mut self.left);
            let left_max = self.left[left_pos];
            let left_second = second_highest(&self.left);
            // another predecessor outweighs us, or two predecessors are comparable
            if left_max > prev_count
                || (left_second >= limits.min_count && left_max < 2 * left_second)
            {
                return WalkResult::blocked(Termination::BackwardBranch, next);
            }
            if right_second >= limits.min_count {
                return WalkResult::blocked(Termination::ForwardBranch, next);
            }
            if count > limits.max_count {
                return WalkResult::blocked(Termination::TooDeep, next);
            }

            path.push(max_pos as u8);
            kmer = next;
            max_pos = self.store.fill_right_counts(&kmer, &mut self.right);
        }
        WalkResult::stop(Termination::TooLong)
    }

    /// Greedily extends `path` right by at most `max_added` bases through
    /// unbranched k-mers. `accept` sees each k-mer before it is appended.
    pub fn extend_right<F>(
        &mut self,
        path: &mut Vec<u8>,
        max_added: usize,
        config: &ExtendConfig,
        mut accept: F,
    ) -> ExtendStop
    where
        F: FnMut(&K) -> bool,
    {
        if path.len() < K::k() {
            return ExtendStop::BadSeed;
        }
        let mut kmer: K = last_kmer(path);
        if self.store.count(&kmer) < config.min_count_extend {
            return ExtendStop::BadSeed;
        }

        for _ in 0..max_added {
            let max_pos = self.store.fill_right_counts(&kmer, &mut self.right);
            let right_max = self.right[max_pos];
            if right_max < config.min_count_extend {
                return ExtendStop::DeadEnd;
            }
            if is_junction(right_max, second_highest(&self.right), config) {
                return ExtendStop::RightBranch;
            }

            let next = kmer.extend_right(max_pos as u8);
            if !config.extend_through_left_junctions {
                let left_pos = self.store.fill_left_counts(&next, &mut self.left);
                if is_junction(self.left[left_pos], second_highest(&self.left), config) {
                    return ExtendStop::LeftBranch;
                }
            }
            if !accept(&next) {
                return ExtendStop::Rejected;
            }

            path.push(max_pos as u8);
            kmer = next;
        }
        ExtendStop::Limit
    }
}
