// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Read error correction against a k-mer store.
//!
//! A read's coverage profile is the count of each of its k-mers. A
//! substitution shows up as a sharp drop followed by k low k-mers. Three
//! strategies try to repair it:
//!
//! * pincer: the k-mer before the error and the k-mer after it must both
//!   predict the same replacement base;
//! * tail: near a read end only the upstream k-mer is available;
//! * reassemble: the read is rebuilt by greedy walks from each end and the
//!   two rebuilds are reconciled base by base.

use std::marker::PhantomData;

use anyhow::Error;
use debruijn::Kmer;

use crate::config::{CorrectConfig, DEFAULT_QUALITY, MAX_REASSEMBLE_PASSES};
use crate::dna::{base_code, code_base, kmer_at, read_kmers, reverse_complement};
use crate::error_tracker::ErrorTracker;
use crate::kmer_table::{second_highest, KmerStore};
use crate::read::Read;

// quality assumed by error counting when the read carries none
const UNKNOWN_QUALITY: u8 = 20;

/// Per-thread buffers reused across reads.
#[derive(Default)]
pub struct CorrectScratch {
    counts: Vec<u32>,
    counts2: Vec<u32>,
    from_left: Vec<u8>,
    from_right: Vec<u8>,
    quals_rev: Vec<u8>,
    covered: Vec<bool>,
    backup_bases: Vec<u8>,
    backup_quals: Option<Vec<u8>>,
    left: [u32; 4],
    right: [u32; 4],
    pub tracker: ErrorTracker,
}

impl CorrectScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coverage profile of the last read handed to `error_correct`.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}

/// Outcome of comparing the two reassembled walks with the original read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkComparison {
    pub detected_inner: usize,
    pub detected_outer: usize,
    /// Some position differs three ways.
    pub rollback: bool,
}

impl WalkComparison {
    pub fn detected(&self) -> usize {
        self.detected_inner + self.detected_outer
    }
}

/// Compares both walks against `original`, then zeroes every walk position
/// that agrees with it so only proposed changes remain.
pub fn compare_walks(original: &[u8], from_left: &mut [u8], from_right: &mut [u8]) -> WalkComparison {
    let mut cmp = WalkComparison::default();
    for ((&a, b), c) in original.iter().zip(from_left.iter_mut()).zip(from_right.iter_mut()) {
        if a != *b || a != *c {
            if *b == *c {
                cmp.detected_inner += 1;
            } else {
                cmp.detected_outer += 1;
                if a != *b && a != *c {
                    cmp.rollback = true;
                }
            }
        }
        if *b == a {
            *b = 0;
        }
        if *c == a {
            *c = 0;
        }
    }
    cmp
}

/// Drops proposed changes from the first crowded window onward. A window of
/// `window` positions is crowded when it holds more than `limit` changes or
/// their qualities sum past `qual_limit`. Returns the number dropped.
pub fn clear_window(
    changes: &mut [u8],
    quals: Option<&[u8]>,
    window: usize,
    limit: usize,
    qual_limit: u32,
) -> usize {
    let qual = |i: usize| quals.map_or(0, |q| u32::from(q[i]));
    let mut count = 0;
    let mut qual_sum = 0;
    for i in 0..changes.len() {
        if changes[i] != 0 {
            count += 1;
            qual_sum += qual(i);
            if count > limit || qual_sum > qual_limit {
                let start = i.saturating_sub(window);
                let mut cleared = 0;
                for c in changes[start..].iter_mut().filter(|c| **c != 0) {
                    *c = 0;
                    cleared += 1;
                }
                return cleared;
            }
        }
        if i + 1 >= window {
            let out = i + 1 - window;
            if changes[out] != 0 {
                count -= 1;
                qual_sum -= qual(out);
            }
        }
    }
    0
}

#[inline]
fn boost(q: u8, increase: u8, min: u8, max: u8) -> u8 {
    q.saturating_add(increase).clamp(min, max)
}

#[inline]
fn qual_at(quals: Option<&[u8]>, i: usize) -> u8 {
    quals.map_or(DEFAULT_QUALITY, |q| q[i])
}

/// Detects and repairs substitution errors in reads.
pub struct ReadCorrector<'a, K, S> {
    store: &'a S,
    config: CorrectConfig,
    phantom: PhantomData<K>,
}

impl<'a, K: Kmer, S: KmerStore<K>> ReadCorrector<'a, K, S> {
    pub fn new(store: &'a S, config: CorrectConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(ReadCorrector {
            store,
            config,
            phantom: PhantomData,
        })
    }

    pub fn config(&self) -> &CorrectConfig {
        &self.config
    }

    /// Count of every k-mer window of `bases`, zero for windows holding N.
    pub fn fill_counts(&self, bases: &[u8], counts: &mut Vec<u32>) {
        counts.clear();
        counts.extend(read_kmers::<K>(bases).map(|kmer| kmer.map_or(0, |k| self.store.count(&k))));
    }

    /// Refreshes the counts of the k-mers covering `pos` after an edit.
    fn regenerate_counts(&self, bases: &[u8], counts: &mut [u32], pos: usize) {
        if counts.is_empty() {
            return;
        }
        let first = (pos + 1).saturating_sub(K::k());
        let last = pos.min(counts.len() - 1);
        for (i, count) in counts.iter_mut().enumerate().take(last + 1).skip(first) {
            *count = kmer_at::<K>(bases, i).map_or(0, |k| self.store.count(&k));
        }
    }

    /// True when `low` is implausibly small next to `high`. With a quality
    /// the ratio threshold grows, so confident bases need a larger drop.
    pub fn is_error(&self, high: u32, low: u32, quality: Option<u8>) -> bool {
        let c = &self.config;
        let mult = match quality {
            Some(q) => c.error_mult1 * (1.0 + f32::from(q) * c.error_mult_q_factor),
            None => c.error_mult1,
        };
        (low as f32) * mult < high as f32
            || (low <= c.error_lower_const
                && high as f32 >= (c.min_count_correct as f32).max(low as f32 * c.error_mult2))
    }

    fn is_error_bidirectional(&self, a: u32, b: u32, qa: u8, qb: u8) -> bool {
        if a >= b {
            self.is_error(a, b, Some(qb))
        } else {
            self.is_error(b, a, Some(qa))
        }
    }

    pub fn is_similar(&self, a: u32, b: u32) -> bool {
        let diff = a.max(b) - a.min(b);
        diff < self.config.path_similarity_constant
            || (diff as f32) < a.max(b) as f32 * self.config.path_similarity_fraction
    }

    fn all_similar(&self, a: u32, counts: &[u32]) -> bool {
        counts.iter().all(|&b| self.is_similar(a, b))
    }

    fn all_errors(&self, a: u32, counts: &[u32]) -> bool {
        counts.iter().all(|&b| self.is_error(a, b, None))
    }

    /// Number of coverage drops or rises that look like errors. After a hit
    /// the next k pairs are skipped since one error spans k k-mers.
    pub fn count_errors(&self, counts: &[u32], quals: Option<&[u8]>) -> usize {
        let k = K::k();
        let mut errors = 0;
        let mut i = 1;
        while i < counts.len() {
            let (qa, qb) = match quals {
                Some(q) => (q[i - 1], q[i + k - 1]),
                None => (UNKNOWN_QUALITY, UNKNOWN_QUALITY),
            };
            if self.is_error_bidirectional(counts[i - 1], counts[i], qa, qb) {
                errors += 1;
                i += k;
            }
            i += 1;
        }
        errors
    }

    /// A drop at `ca` that looks like a single substituted base at `ca + k`:
    /// stable coverage before, k low k-mers after, recovery past the base.
    pub fn is_substitution(&self, ca: usize, extension: usize, qb: u8, counts: &[u32]) -> bool {
        let k = K::k();
        let a = counts[ca];
        if !self.is_error(a, counts[ca + 1], Some(qb))
            || !self.all_similar(a, &counts[ca.saturating_sub(extension)..ca])
        {
            return false;
        }
        let low_end = (ca + k + 1).min(counts.len());
        if !self.all_errors(a, &counts[(ca + 2).min(low_end)..low_end]) {
            return false;
        }
        let cc = ca + k;
        let cd = cc + 1;
        if cd < counts.len() {
            let (c, d) = (counts[cc], counts[cd]);
            self.is_error(a, d, None) || self.is_error(d, c, Some(qb))
        } else {
            true
        }
    }

    fn commit_base(read: &mut Read, pos: usize, code: u8, increase: u8, min: u8, max: u8) {
        read.bases[pos] = code_base(code);
        if let Some(q) = read.quals.as_mut() {
            q[pos] = boost(q[pos], increase, min, max);
        }
    }

    fn pincer_base(&self, read: &mut Read, ca: usize, s: &mut CorrectScratch) -> bool {
        let c = &self.config;
        let pos = ca + K::k();
        let (left_kmer, right_kmer) = match (kmer_at::<K>(&read.bases, ca), kmer_at::<K>(&read.bases, pos + 1)) {
            (Some(l), Some(r)) => (l, r),
            _ => return false,
        };
        let from_left = self.store.fill_right_counts(&left_kmer, &mut s.right);
        let from_right = self.store.fill_left_counts(&right_kmer, &mut s.left);
        let (left_max, right_max) = (s.right[from_left], s.left[from_right]);

        if from_left != from_right
            || left_max < c.min_count_correct
            || right_max < c.min_count_correct
            || !self.is_error(left_max, second_highest(&s.right), None)
            || !self.is_error(right_max, second_highest(&s.left), None)
            || base_code(read.bases[pos]) == Some(from_left as u8)
        {
            return false;
        }
        Self::commit_base(read, pos, from_left as u8, c.q_increase_pincer, c.q_min_pincer, c.q_max_pincer);
        true
    }

    /// Repairs errors with anchors on both sides. Returns corrections made.
    pub fn correct_pincer(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let k = K::k();
        let extension = self.config.error_extension_pincer;
        let mut corrected = 0;
        let mut ca = 0;
        while ca + k + 2 <= s.counts.len() {
            let qb = qual_at(read.quals.as_deref(), ca + k);
            if self.is_substitution(ca, extension, qb, &s.counts) {
                s.tracker.detected_pincer += 1;
                if self.pincer_base(read, ca, s) {
                    corrected += 1;
                    self.regenerate_counts(&read.bases, &mut s.counts, ca + k);
                }
            }
            ca += 1;
        }
        s.tracker.corrected_pincer += corrected;
        corrected
    }

    fn tail_base(&self, read: &mut Read, ca: usize, s: &mut CorrectScratch) -> bool {
        let c = &self.config;
        let pos = ca + K::k();
        let kmer: K = match kmer_at(&read.bases, ca) {
            Some(kmer) => kmer,
            None => return false,
        };
        let best = self.store.fill_right_counts(&kmer, &mut s.right);
        let max = s.right[best];
        if max < c.min_count_correct
            || !self.is_error(max, second_highest(&s.right), None)
            || base_code(read.bases[pos]) == Some(best as u8)
        {
            return false;
        }
        Self::commit_base(read, pos, best as u8, c.q_increase_tail, c.q_min_tail, c.q_max_tail);
        true
    }

    /// Repairs errors in the last k bases, where no downstream anchor exists.
    pub fn correct_tail(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let k = K::k();
        let extension = self.config.error_extension_tail;
        let len = s.counts.len();
        if len < 2 {
            return 0;
        }
        let mut corrected = 0;
        for ca in len.saturating_sub(k + 1)..len - 1 {
            let a = s.counts[ca];
            let qb = qual_at(read.quals.as_deref(), ca + k);
            if self.is_error(a, s.counts[ca + 1], Some(qb))
                && self.all_similar(a, &s.counts[ca.saturating_sub(extension)..ca])
                && self.all_errors(a, &s.counts[ca + 1..])
            {
                s.tracker.detected_tail += 1;
                if self.tail_base(read, ca, s) {
                    corrected += 1;
                    self.regenerate_counts(&read.bases, &mut s.counts, ca + k);
                }
            }
        }
        s.tracker.corrected_tail += corrected;
        corrected
    }

    /// Tail correction at both ends; the left end is handled on the
    /// reverse complement.
    pub fn correct_tails(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let mut corrected = self.correct_tail(read, s);
        read.reverse_complement();
        s.counts.reverse();
        corrected += self.correct_tail(read, s);
        read.reverse_complement();
        s.counts.reverse();
        corrected
    }

    /// Greedy left-to-right rebuild: wherever coverage drops sharply after a
    /// stable stretch, the base is replaced by the dominant successor.
    fn reassemble_inner(&self, bases: &mut [u8], quals: Option<&[u8]>, counts: &mut [u32], right: &mut [u32; 4]) -> usize {
        let k = K::k();
        let c = &self.config;
        let len = bases.len();
        if len < k + 1 + c.dead_zone {
            return 0;
        }
        let mut corrected = 0;
        for ca in 0..counts.len().saturating_sub(1) {
            let pos = ca + k;
            if pos + c.dead_zone >= len {
                break;
            }
            let a = counts[ca];
            if !self.is_error(a, counts[ca + 1], Some(qual_at(quals, pos)))
                || !self.all_similar(a, &counts[ca.saturating_sub(c.error_extension_reassemble)..ca])
            {
                continue;
            }
            let kmer: K = match kmer_at(bases, ca) {
                Some(kmer) => kmer,
                None => continue,
            };
            let best = self.store.fill_right_counts(&kmer, right);
            let max = right[best];
            if max >= c.min_count_correct
                && self.is_error(max, second_highest(right), None)
                && base_code(bases[pos]) != Some(best as u8)
            {
                bases[pos] = code_base(best as u8);
                corrected += 1;
                self.regenerate_counts(bases, counts, pos);
            }
        }
        corrected
    }

    /// One reassembly pass. Returns corrections committed; a three-way
    /// disagreement anywhere discards the whole pass.
    pub fn reassemble_pass(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let k = K::k();
        let c = &self.config;
        if read.len() < k + 1 + c.dead_zone {
            return 0;
        }

        s.from_left.clear();
        s.from_left.extend_from_slice(&read.bases);
        s.counts2.clear();
        s.counts2.extend_from_slice(&s.counts);
        self.reassemble_inner(&mut s.from_left, read.quals.as_deref(), &mut s.counts2, &mut s.right);

        s.from_right.clear();
        s.from_right.extend_from_slice(&read.bases);
        reverse_complement(&mut s.from_right);
        s.counts2.clear();
        s.counts2.extend(s.counts.iter().rev());
        s.quals_rev.clear();
        if let Some(q) = read.quals.as_ref() {
            s.quals_rev.extend(q.iter().rev());
        }
        let quals_rev = read.quals.as_ref().map(|_| &s.quals_rev[..]);
        self.reassemble_inner(&mut s.from_right, quals_rev, &mut s.counts2, &mut s.right);
        reverse_complement(&mut s.from_right);

        let cmp = compare_walks(&read.bases, &mut s.from_left, &mut s.from_right);
        s.tracker.detected_reassemble += cmp.detected();
        if cmp.rollback {
            s.tracker.rollback = true;
            return 0;
        }
        if cmp.detected() == 0 {
            return 0;
        }

        clear_window(&mut s.from_left, read.quals.as_deref(), c.window_len, c.window_count, c.window_qual_sum);
        s.from_right.reverse();
        clear_window(&mut s.from_right, quals_rev, c.window_len, c.window_count, c.window_qual_sum);
        s.from_right.reverse();

        let len = read.len();
        let (mut inner, mut outer) = (0, 0);
        for i in 0..len {
            let (a, b, r) = (read.bases[i], s.from_left[i], s.from_right[i]);
            let mut d = match (b, r) {
                (0, 0) => a,
                (b, r) if b == r => b,
                (0, r) => r,
                (b, 0) => b,
                _ => a,
            };
            // away from the ends both walks must agree
            if c.require_bidirectional && b != r && i >= k && i < len - k {
                d = a;
            }
            if d == a {
                continue;
            }
            read.bases[i] = d;
            let q = read.quals.as_mut().map(|q| &mut q[i]);
            if b == r {
                inner += 1;
                if let Some(q) = q {
                    *q = boost(*q, c.q_increase_pincer, c.q_min_pincer, c.q_max_pincer);
                }
            } else {
                outer += 1;
                if let Some(q) = q {
                    *q = boost(*q, c.q_increase_tail, c.q_min_tail, c.q_max_tail);
                }
            }
        }

        s.tracker.corrected_reassemble_inner += inner;
        s.tracker.corrected_reassemble_outer += outer;
        if inner + outer > 0 {
            self.fill_counts(&read.bases, &mut s.counts);
        }
        inner + outer
    }

    /// Repeats reassembly while passes still fix something and leave
    /// detected positions unresolved.
    pub fn reassemble(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let detected_before = s.tracker.detected_reassemble;
        let mut corrected = self.reassemble_pass(read, s);
        let mut pass_corrected = corrected;
        let mut uncorrected = (s.tracker.detected_reassemble - detected_before).saturating_sub(pass_corrected);

        let mut passes = 1;
        while passes < MAX_REASSEMBLE_PASSES && pass_corrected > 0 && uncorrected > 0 {
            // unresolved positions are counted again by the next pass
            s.tracker.detected_reassemble -= uncorrected;
            let detected_before = s.tracker.detected_reassemble;
            pass_corrected = self.reassemble_pass(read, s);
            corrected += pass_corrected;
            uncorrected = (s.tracker.detected_reassemble - detected_before).saturating_sub(pass_corrected);
            passes += 1;
        }
        corrected
    }

    /// Turns bases that no k-mer of at least `mark_bad_bases` covers into
    /// `N`, or lowers their quality. Returns the number marked.
    pub fn mark_bad_bases(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        let k = K::k();
        let c = &self.config;
        if s.counts.is_empty() {
            return 0;
        }
        let len = read.len();
        s.covered.clear();
        s.covered.resize(len, false);
        for (i, &count) in s.counts.iter().enumerate() {
            if count >= c.mark_bad_bases {
                s.covered[i..i + k].iter_mut().for_each(|b| *b = true);
            }
        }

        let mut marked = 0;
        let mut consecutive_bad = 0;
        for i in 0..len {
            if s.covered[i] {
                consecutive_bad = 0;
                continue;
            }
            consecutive_bad += 1;
            let mut mark = read.quals.as_ref().is_some_and(|q| q[i] > c.mark_quality) || read.bases[i] != b'N';
            if mark && c.mark_delta_only {
                mark = consecutive_bad >= k
                    || s.covered.get(i + 1).copied().unwrap_or(false)
                    || (i > 0 && s.covered[i - 1]);
            }
            if mark {
                marked += 1;
                if c.mark_quality < 1 {
                    read.bases[i] = b'N';
                }
                let floor = if read.bases[i] == b'N' { 0 } else { c.mark_quality };
                if let Some(q) = read.quals.as_mut() {
                    q[i] = q[i].min(floor);
                }
            }
            if read.bases[i] == b'N' || read.quals.as_ref().is_some_and(|q| q[i] <= c.mark_quality) {
                consecutive_bad = 0;
            }
        }
        marked
    }

    /// Suspected errors left in the read's current coverage profile.
    pub fn remaining_errors(&self, read: &Read, s: &CorrectScratch) -> usize {
        self.count_errors(&s.counts, read.quals.as_deref())
    }

    /// Restores the bases and qualities saved before pincer and tail ran
    /// when their edits left more suspected errors than `suspected`.
    /// Returns true if the read was restored.
    fn undo_if_worse(&self, read: &mut Read, s: &mut CorrectScratch, suspected: usize) -> bool {
        let changed = s.tracker.corrected_pincer + s.tracker.corrected_tail;
        if changed == 0 || self.remaining_errors(read, s) <= suspected {
            return false;
        }
        read.bases.clear();
        read.bases.extend_from_slice(&s.backup_bases);
        read.quals.clone_from(&s.backup_quals);
        self.fill_counts(&read.bases, &mut s.counts);
        s.tracker.corrected_pincer = 0;
        s.tracker.corrected_tail = 0;
        s.tracker.rollback = true;
        true
    }

    /// Corrects `read` in place. Returns the number of bases changed; the
    /// per-method breakdown is left in `s.tracker`.
    pub fn error_correct(&self, read: &mut Read, s: &mut CorrectScratch) -> usize {
        s.tracker.clear();
        let c = &self.config;
        if read.len() < K::k() {
            s.counts.clear();
            return 0;
        }
        self.fill_counts(&read.bases, &mut s.counts);
        let suspected = self.count_errors(&s.counts, read.quals.as_deref());
        s.tracker.suspected = suspected;

        if suspected > 0 && (c.pincer || c.tail) {
            s.backup_bases.clear();
            s.backup_bases.extend_from_slice(&read.bases);
            s.backup_quals.clone_from(&read.quals);

            if c.pincer {
                self.correct_pincer(read, s);
            }
            if c.tail {
                self.correct_tails(read, s);
            }
            if c.rollback {
                self.undo_if_worse(read, s, suspected);
            }
        }

        if c.reassemble && suspected > 0 && self.remaining_errors(read, s) > 0 {
            self.reassemble(read, s);
        }

        if c.mark_bad_bases > 0 && (!c.mark_error_reads_only || suspected > 0) {
            s.tracker.marked = self.mark_bad_bases(read, s);
        }
        s.tracker.corrected()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::KmerType;
    use crate::kmer_table::KmerTable;
    use crate::test_utils::{random_dna, table_from};
    use proptest::prelude::*;
    use proptest::proptest;

    fn k() -> usize {
        KmerType::k()
    }

    fn mutate(bases: &mut [u8], pos: usize) {
        let code = base_code(bases[pos]).unwrap();
        bases[pos] = code_base((code + 1) % 4);
    }

    /// A genome at depth 20 and one copy of a read from it carrying a
    /// substitution at `error_pos`.
    fn setup(seed: u64, error_pos: usize) -> (Vec<u8>, Read, KmerTable<KmerType>) {
        let genome = random_dna(seed, 300);
        let truth = genome[50..150].to_vec();
        let mut bases = truth.clone();
        mutate(&mut bases, error_pos);
        let table = table_from(&[(&genome[..], 20), (&bases[..], 1)]);
        let read = Read::new("r", 7, bases, Some(vec![30; 100]));
        (truth, read, table)
    }

    fn corrector(table: &KmerTable<KmerType>, config: CorrectConfig) -> ReadCorrector<'_, KmerType, KmerTable<KmerType>> {
        ReadCorrector::new(table, config).unwrap()
    }

    #[test]
    fn clean_read_is_untouched() {
        let genome = random_dna(40, 150);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 5)]);
        let c = corrector(&table, CorrectConfig::default());
        let mut read = Read::new("r", 0, genome.clone(), None);
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 0);
        assert_eq!(read.bases, genome);
        assert_eq!(s.tracker.suspected, 0);
        assert_eq!(s.tracker.detected(), 0);
        assert_eq!(s.counts().len(), 150 - k() + 1);
    }

    #[test]
    fn error_thresholds() {
        let table: KmerTable<KmerType> = table_from(&[(&b"ACGT"[..], 1)]);
        let c = corrector(&table, CorrectConfig::default());
        assert!(c.is_error(81, 5, None));
        assert!(!c.is_error(80, 5, None));
        // the low-count floor catches ratios below error_mult1
        assert!(c.is_error(11, 4, None));
        assert!(!c.is_error(10, 4, None));
        assert!(!c.is_error(2, 1, None));
        // high quality asks for a larger drop
        assert!(c.is_error(85, 5, Some(0)));
        assert!(!c.is_error(85, 5, Some(40)));

        assert!(c.is_similar(10, 12));
        assert!(c.is_similar(100, 130));
        assert!(!c.is_similar(100, 200));
    }

    #[test]
    fn suspected_errors_skip_one_kmer_span() {
        let (_, read, table) = setup(41, 50);
        let c = corrector(&table, CorrectConfig::default());
        let mut counts = Vec::new();
        c.fill_counts(&read.bases, &mut counts);
        assert_eq!(c.count_errors(&counts, read.quals.as_deref()), 1);
        assert_eq!(c.count_errors(&counts, None), 1);
    }

    #[test]
    fn pincer_fixes_middle_substitution() {
        let (truth, mut read, table) = setup(42, 50);
        let c = corrector(&table, CorrectConfig::default());
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 1);
        assert_eq!(read.bases, truth);
        assert_eq!(s.tracker.detected_pincer, 1);
        assert_eq!(s.tracker.corrected_pincer, 1);
        assert_eq!(s.tracker.corrected_reassemble(), 0);
        assert_eq!(read.quality(50), Some(32));
        assert_eq!(read.quality(49), Some(30));
        assert_eq!(c.remaining_errors(&read, &s), 0);
    }

    #[test]
    fn tail_fixes_right_end() {
        let (truth, mut read, table) = setup(43, 95);
        let c = corrector(&table, CorrectConfig::default());
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 1);
        assert_eq!(read.bases, truth);
        assert_eq!(s.tracker.corrected_tail, 1);
        assert_eq!(s.tracker.corrected_pincer, 0);
        assert_eq!(read.quality(95), Some(28));
    }

    #[test]
    fn tail_fixes_left_end() {
        let (truth, mut read, table) = setup(44, 3);
        let c = corrector(&table, CorrectConfig::default());
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 1);
        assert_eq!(read.bases, truth);
        assert_eq!(s.tracker.corrected_tail, 1);
        assert_eq!(read.quality(3), Some(28));
    }

    #[test]
    fn reassemble_agrees_from_both_sides() {
        let (truth, mut read, table) = setup(45, 50);
        let config = CorrectConfig {
            pincer: false,
            tail: false,
            ..CorrectConfig::default()
        };
        let c = corrector(&table, config);
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 1);
        assert_eq!(read.bases, truth);
        assert_eq!(s.tracker.corrected_reassemble_inner, 1);
        assert_eq!(s.tracker.corrected_reassemble_outer, 0);
        assert_eq!(s.tracker.detected_reassemble, 1);
        assert!(!s.tracker.rollback);
        assert_eq!(read.quality(50), Some(32));
    }

    #[test]
    fn three_way_disagreement_discards_the_pass() {
        // the left flank predicts A and the right flank predicts C where the read has T
        let left = random_dna(81, 40);
        let right = random_dna(82, 40);
        let from_left = [&left[..], &b"A"[..], &random_dna(83, 40)[..]].concat();
        let from_right = [&random_dna(84, 40)[..], &b"C"[..], &right[..]].concat();
        let bases = [&left[..], &b"T"[..], &right[..]].concat();
        let table: KmerTable<KmerType> =
            table_from(&[(&from_left[..], 20), (&from_right[..], 20), (&bases[..], 1)]);
        let c = corrector(&table, CorrectConfig::default());
        let mut read = Read::new("r", 0, bases, Some(vec![30; 81]));
        let original = read.clone();
        let mut s = CorrectScratch::new();
        c.fill_counts(&read.bases, &mut s.counts);

        assert_eq!(c.reassemble_pass(&mut read, &mut s), 0);
        assert_eq!(read, original);
        assert!(s.tracker.rollback);
        assert!(s.tracker.detected_reassemble > 0);
        assert_eq!(s.tracker.corrected_reassemble(), 0);
    }

    #[test]
    fn edits_that_add_errors_are_undone() {
        let (_, mut read, table) = setup(49, 50);
        let c = corrector(&table, CorrectConfig::default());
        let mut s = CorrectScratch::new();
        let original = read.clone();
        c.fill_counts(&read.bases, &mut s.counts);
        let suspected = c.count_errors(&s.counts, read.quals.as_deref());
        assert_eq!(suspected, 1);

        s.backup_bases.clone_from(&read.bases);
        s.backup_quals.clone_from(&read.quals);
        // two bad edits near the ends
        for pos in [5, 95] {
            mutate(&mut read.bases, pos);
            read.quals.as_mut().unwrap()[pos] = 32;
        }
        s.tracker.corrected_pincer = 2;
        c.fill_counts(&read.bases, &mut s.counts);
        assert!(c.remaining_errors(&read, &s) > suspected);

        assert!(c.undo_if_worse(&mut read, &mut s, suspected));
        assert_eq!(read, original);
        assert!(s.tracker.rollback);
        assert_eq!(s.tracker.corrected_pincer, 0);
        assert_eq!(c.remaining_errors(&read, &s), suspected);
    }

    #[test]
    fn edits_that_help_are_kept() {
        let (truth, mut read, table) = setup(50, 50);
        let c = corrector(&table, CorrectConfig::default());
        let mut s = CorrectScratch::new();
        s.backup_bases.clone_from(&read.bases);
        s.backup_quals.clone_from(&read.quals);
        read.bases.clone_from(&truth);
        s.tracker.corrected_pincer = 1;
        c.fill_counts(&read.bases, &mut s.counts);

        assert!(!c.undo_if_worse(&mut read, &mut s, 1));
        assert_eq!(read.bases, truth);
        assert!(!s.tracker.rollback);
    }

    #[test]
    fn disabled_strategies_change_nothing() {
        let (_, mut read, table) = setup(46, 50);
        let original = read.clone();
        let config = CorrectConfig {
            pincer: false,
            tail: false,
            reassemble: false,
            ..CorrectConfig::default()
        };
        let c = corrector(&table, config);
        let mut s = CorrectScratch::new();

        assert_eq!(c.error_correct(&mut read, &mut s), 0);
        assert_eq!(read, original);
        assert_eq!(s.tracker.suspected, 1);
    }

    #[test]
    fn walk_comparison() {
        let original = b"ACGTACGT".to_vec();
        let mut left = b"ACGAACGT".to_vec();
        let mut right = b"ACGAACGA".to_vec();
        let cmp = compare_walks(&original, &mut left, &mut right);
        assert_eq!(cmp.detected_inner, 1);
        assert_eq!(cmp.detected_outer, 1);
        assert!(!cmp.rollback);
        assert_eq!(left, vec![0, 0, 0, b'A', 0, 0, 0, 0]);
        assert_eq!(right, vec![0, 0, 0, b'A', 0, 0, 0, b'A']);

        let mut left = b"ACCTACGT".to_vec();
        let mut right = b"ACATACGT".to_vec();
        assert!(compare_walks(&original, &mut left, &mut right).rollback);
    }

    #[test]
    fn crowded_window_is_cleared() {
        let mut changes = vec![0u8; 20];
        for i in [2, 4, 6, 8] {
            changes[i] = b'A';
        }
        assert_eq!(clear_window(&mut changes.clone(), None, 12, 6, 80), 0);

        // seven changes within twelve positions
        for i in [10, 11, 12] {
            changes[i] = b'C';
        }
        let cleared = clear_window(&mut changes, None, 12, 6, 80);
        assert_eq!(cleared, 7);
        assert!(changes.iter().all(|&c| c == 0));

        // quality sum alone can trip the window
        let mut changes = vec![0u8; 20];
        changes[15] = b'G';
        changes[16] = b'G';
        let quals = vec![41u8; 20];
        assert_eq!(clear_window(&mut changes, Some(&quals), 12, 6, 80), 2);
    }

    #[test]
    fn uncovered_bases_are_marked() {
        let genome = random_dna(47, 200);
        let mut bases = genome[50..110].to_vec();
        bases.extend(random_dna(48, 40));
        let table: KmerTable<KmerType> = table_from(&[(&genome[..], 10)]);
        let config = CorrectConfig {
            pincer: false,
            tail: false,
            reassemble: false,
            mark_bad_bases: 2,
            mark_delta_only: false,
            mark_error_reads_only: false,
            ..CorrectConfig::default()
        };
        let c = corrector(&table, config);
        let mut read = Read::new("r", 0, bases, Some(vec![30; 100]));
        let mut s = CorrectScratch::new();

        c.error_correct(&mut read, &mut s);
        assert_eq!(s.tracker.marked, 40);
        assert_eq!(&read.bases[..60], &genome[50..110]);
        assert!(read.bases[60..].iter().all(|&b| b == b'N'));
        assert!(read.quals.as_ref().unwrap()[60..].iter().all(|&q| q == 0));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 30, .. ProptestConfig::default()})]
        #[test]
        fn single_substitution_is_repaired(seed in 0..5_000u64, pos in 0..100usize) {
            let (truth, mut read, table) = setup(seed, pos);
            let c = corrector(&table, CorrectConfig::default());
            let mut s = CorrectScratch::new();
            let corrected = c.error_correct(&mut read, &mut s);
            prop_assert_eq!(corrected, 1);
            prop_assert_eq!(&read.bases, &truth);
        }
    }
}
