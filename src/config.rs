// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

use anyhow::{bail, Error};
use debruijn::kmer;

// table configs
pub const DEFAULT_BUCKETS: usize = 64;
pub const PROBE_LIMIT: usize = 4;
pub const MIN_ARRAY_LEN: usize = 8;

// Worker queue configs
pub const MAX_WORKER: usize = 2;

// shave rounds stop once a round removes fewer k-mers than this
pub const SHAVE_ROUND_MIN_REMOVED: usize = 100;
pub const MAX_SHAVE_ROUNDS: usize = 4;

// reassembly passes per read, including the first
pub const MAX_REASSEMBLE_PASSES: usize = 6;

// quality assumed for committed corrections when a read carries none
pub const DEFAULT_QUALITY: u8 = 30;

pub type KmerType = kmer::Kmer24;
pub type LargeKmerType = kmer::Kmer40;

/// Tip and bubble removal thresholds.
#[derive(Clone, Debug)]
pub struct ShaveConfig {
    /// Neighbors below this count are not followed.
    pub min_count: u32,
    /// Paths entering k-mers deeper than this are never removed. Also the
    /// number of shave rounds.
    pub max_count: u32,
    /// Lowest count a seed k-mer may have.
    pub min_seed: u32,
    pub max_length_to_discard: usize,
    pub max_distance_to_explore: usize,
    pub threads: usize,
}

impl Default for ShaveConfig {
    fn default() -> Self {
        ShaveConfig {
            min_count: 1,
            max_count: 1,
            min_seed: 1,
            max_length_to_discard: 150,
            max_distance_to_explore: 100,
            threads: MAX_WORKER,
        }
    }
}

impl ShaveConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_count == 0 {
            bail!("shave min_count must be at least 1");
        }
        if self.max_count < self.min_count {
            bail!(
                "shave max_count ({}) below min_count ({})",
                self.max_count,
                self.min_count
            );
        }
        if self.threads == 0 {
            bail!("shave needs at least one thread");
        }
        Ok(())
    }
}

/// Thresholds for unbranched extension and junction detection.
#[derive(Clone, Debug)]
pub struct ExtendConfig {
    pub min_count_extend: u32,
    pub branch_mult1: f32,
    pub branch_mult2: f32,
    pub branch_lower_const: u32,
    pub extend_through_left_junctions: bool,
    pub extension_quality: u8,
}

impl Default for ExtendConfig {
    fn default() -> Self {
        ExtendConfig {
            min_count_extend: 2,
            branch_mult1: 20.0,
            branch_mult2: 3.0,
            branch_lower_const: 3,
            extend_through_left_junctions: true,
            extension_quality: DEFAULT_QUALITY,
        }
    }
}

impl ExtendConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_count_extend == 0 {
            bail!("min_count_extend must be at least 1");
        }
        if self.branch_mult1 < 1.0 || self.branch_mult2 < 1.0 {
            bail!("branch multipliers must be at least 1");
        }
        Ok(())
    }
}

/// Contig seeding and emission thresholds.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub min_count_seed: u32,
    pub min_contig_len: usize,
    pub min_coverage: f32,
    pub max_contig_len: usize,
    pub contig_passes: usize,
    pub contig_pass_mult: f64,
    pub threads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            min_count_seed: 3,
            min_contig_len: 100,
            min_coverage: 1.0,
            max_contig_len: 1_000_000_000,
            contig_passes: 16,
            contig_pass_mult: 1.7,
            threads: MAX_WORKER,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_count_seed == 0 {
            bail!("min_count_seed must be at least 1");
        }
        if self.contig_passes == 0 {
            bail!("contig_passes must be at least 1");
        }
        if self.contig_pass_mult < 1.0 {
            bail!("contig_pass_mult must be at least 1");
        }
        if self.threads == 0 {
            bail!("contig building needs at least one thread");
        }
        Ok(())
    }
}

/// Error detection and correction thresholds.
#[derive(Clone, Debug)]
pub struct CorrectConfig {
    pub error_mult1: f32,
    pub error_mult2: f32,
    pub error_mult_q_factor: f32,
    pub error_lower_const: u32,
    pub min_count_correct: u32,
    pub path_similarity_constant: u32,
    pub path_similarity_fraction: f32,
    pub error_extension_pincer: usize,
    pub error_extension_tail: usize,
    pub error_extension_reassemble: usize,
    pub dead_zone: usize,

    pub window_len: usize,
    pub window_count: usize,
    pub window_qual_sum: u32,

    pub q_increase_pincer: u8,
    pub q_min_pincer: u8,
    pub q_max_pincer: u8,
    pub q_increase_tail: u8,
    pub q_min_tail: u8,
    pub q_max_tail: u8,

    pub pincer: bool,
    pub tail: bool,
    pub reassemble: bool,
    pub rollback: bool,
    pub require_bidirectional: bool,

    /// Mark bases covered by no k-mer of at least this count; 0 disables.
    pub mark_bad_bases: u32,
    pub mark_delta_only: bool,
    pub mark_error_reads_only: bool,
    pub mark_quality: u8,
}

impl Default for CorrectConfig {
    fn default() -> Self {
        CorrectConfig {
            error_mult1: 16.0,
            error_mult2: 2.6,
            error_mult_q_factor: 0.002,
            error_lower_const: 4,
            min_count_correct: 3,
            path_similarity_constant: 3,
            path_similarity_fraction: 0.45,
            error_extension_pincer: 5,
            error_extension_tail: 9,
            error_extension_reassemble: 5,
            dead_zone: 0,

            window_len: 12,
            window_count: 6,
            window_qual_sum: 80,

            q_increase_pincer: 8,
            q_min_pincer: 24,
            q_max_pincer: 32,
            q_increase_tail: 4,
            q_min_tail: 20,
            q_max_tail: 28,

            pincer: true,
            tail: true,
            reassemble: true,
            rollback: true,
            require_bidirectional: true,

            mark_bad_bases: 0,
            mark_delta_only: true,
            mark_error_reads_only: true,
            mark_quality: 0,
        }
    }
}

impl CorrectConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.error_mult1 < 1.0 || self.error_mult2 < 1.0 {
            bail!("error multipliers must be at least 1");
        }
        if self.window_count > self.window_len {
            bail!(
                "window_count ({}) exceeds window_len ({})",
                self.window_count,
                self.window_len
            );
        }
        if self.q_min_pincer > self.q_max_pincer || self.q_min_tail > self.q_max_tail {
            bail!("quality floor above quality ceiling");
        }
        if !(0.0..=1.0).contains(&self.path_similarity_fraction) {
            bail!("path_similarity_fraction must lie in [0, 1]");
        }
        Ok(())
    }
}

/// Per-read pipeline switches.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    pub ecc: bool,
    pub extend_left: usize,
    pub extend_right: usize,
    pub extension_rollback: usize,
    pub discard_uncorrectable: bool,
    pub require_both_bad: bool,
    pub toss_junk: bool,
    /// Discard reads whose k-mers sit at or below this count.
    pub discard_low_depth: Option<u32>,
    pub low_depth_fraction: f64,
    pub threads: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            ecc: true,
            extend_left: 0,
            extend_right: 0,
            extension_rollback: 3,
            discard_uncorrectable: false,
            require_both_bad: false,
            toss_junk: false,
            discard_low_depth: None,
            low_depth_fraction: 0.0,
            threads: MAX_WORKER,
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.threads == 0 {
            bail!("read processing needs at least one thread");
        }
        if !(0.0..=1.0).contains(&self.low_depth_fraction) {
            bail!("low_depth_fraction must lie in [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ShaveConfig::default().validate().is_ok());
        assert!(ExtendConfig::default().validate().is_ok());
        assert!(BuildConfig::default().validate().is_ok());
        assert!(CorrectConfig::default().validate().is_ok());
        assert!(ProcessConfig::default().validate().is_ok());
    }

    #[test]
    fn inconsistent_values_rejected() {
        let shave = ShaveConfig {
            min_count: 4,
            max_count: 2,
            ..ShaveConfig::default()
        };
        assert!(shave.validate().is_err());

        let correct = CorrectConfig {
            window_count: 20,
            ..CorrectConfig::default()
        };
        assert!(correct.validate().is_err());

        let build = BuildConfig {
            threads: 0,
            ..BuildConfig::default()
        };
        assert!(build.validate().is_err());
    }
}
