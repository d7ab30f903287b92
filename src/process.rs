// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Per-read pipeline: error correction, filtering and extension, run over
//! read pairs on a rayon pool.

use std::ops::Add;
use std::time::Instant;

use anyhow::Error;
use debruijn::Kmer;
use log::{debug, info};
use rayon::prelude::*;

use crate::config::{CorrectConfig, ExtendConfig, ProcessConfig};
use crate::correct::{CorrectScratch, ReadCorrector};
use crate::extend::ReadExtender;
use crate::kmer_table::KmerStore;
use crate::read::{Read, ReadPair};

/// Read and base tallies, summed over threads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub reads_in: u64,
    pub bases_in: u64,
    /// Reads that arrived already discarded.
    pub lowq_reads: u64,
    pub lowq_bases: u64,

    pub reads_detected: u64,
    pub bases_detected: u64,
    pub reads_corrected: u64,
    pub bases_corrected_pincer: u64,
    pub bases_corrected_tail: u64,
    pub bases_corrected_reassemble: u64,
    pub reads_fully_corrected: u64,
    pub rollbacks: u64,
    pub reads_marked: u64,
    pub bases_marked: u64,

    pub uncorrectable_reads: u64,
    pub junk_reads: u64,
    pub low_depth_reads: u64,
    pub reads_discarded: u64,
    pub bases_discarded: u64,

    pub reads_extended: u64,
    pub bases_extended: u64,
}

impl Add for ProcessStats {
    type Output = ProcessStats;

    fn add(self, o: ProcessStats) -> ProcessStats {
        ProcessStats {
            reads_in: self.reads_in + o.reads_in,
            bases_in: self.bases_in + o.bases_in,
            lowq_reads: self.lowq_reads + o.lowq_reads,
            lowq_bases: self.lowq_bases + o.lowq_bases,
            reads_detected: self.reads_detected + o.reads_detected,
            bases_detected: self.bases_detected + o.bases_detected,
            reads_corrected: self.reads_corrected + o.reads_corrected,
            bases_corrected_pincer: self.bases_corrected_pincer + o.bases_corrected_pincer,
            bases_corrected_tail: self.bases_corrected_tail + o.bases_corrected_tail,
            bases_corrected_reassemble: self.bases_corrected_reassemble + o.bases_corrected_reassemble,
            reads_fully_corrected: self.reads_fully_corrected + o.reads_fully_corrected,
            rollbacks: self.rollbacks + o.rollbacks,
            reads_marked: self.reads_marked + o.reads_marked,
            bases_marked: self.bases_marked + o.bases_marked,
            uncorrectable_reads: self.uncorrectable_reads + o.uncorrectable_reads,
            junk_reads: self.junk_reads + o.junk_reads,
            low_depth_reads: self.low_depth_reads + o.low_depth_reads,
            reads_discarded: self.reads_discarded + o.reads_discarded,
            bases_discarded: self.bases_discarded + o.bases_discarded,
            reads_extended: self.reads_extended + o.reads_extended,
            bases_extended: self.bases_extended + o.bases_extended,
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl ProcessStats {
    pub fn bases_corrected(&self) -> u64 {
        self.bases_corrected_pincer + self.bases_corrected_tail + self.bases_corrected_reassemble
    }

    pub fn log_summary(&self) {
        info!("Input: {} reads, {} bases", self.reads_in, self.bases_in);
        if self.lowq_reads > 0 {
            info!("Low quality discards: {} reads, {} bases", self.lowq_reads, self.lowq_bases);
        }
        info!(
            "Errors detected: {} bases in {} reads ({:.2}%)",
            self.bases_detected,
            self.reads_detected,
            percent(self.reads_detected, self.reads_in)
        );
        info!(
            "Errors corrected: {} bases in {} reads, {} fully corrected",
            self.bases_corrected(),
            self.reads_corrected,
            self.reads_fully_corrected
        );
        debug!(
            "Corrected by method: pincer {}, tail {}, reassemble {}; rollbacks {}",
            self.bases_corrected_pincer, self.bases_corrected_tail, self.bases_corrected_reassemble, self.rollbacks
        );
        if self.reads_marked > 0 {
            info!("Marked {} bases in {} reads", self.bases_marked, self.reads_marked);
        }
        if self.reads_extended > 0 {
            info!("Extended {} reads by {} bases", self.reads_extended, self.bases_extended);
        }
        info!(
            "Discarded {} reads ({:.2}%), {} bases: {} uncorrectable, {} junk, {} low depth",
            self.reads_discarded,
            percent(self.reads_discarded, self.reads_in),
            self.bases_discarded,
            self.uncorrectable_reads,
            self.junk_reads,
            self.low_depth_reads
        );
    }
}

/// Runs correction, filters and extension against a shared k-mer store.
pub struct ReadProcessor<'a, K, S> {
    corrector: ReadCorrector<'a, K, S>,
    extender: ReadExtender<'a, K, S>,
    config: ProcessConfig,
}

impl<'a, K, S> ReadProcessor<'a, K, S>
where
    K: Kmer + Send + Sync,
    S: KmerStore<K>,
{
    /// With `ecc` off the correction strategies are disabled; bad-base
    /// marking still runs when configured.
    pub fn new(
        store: &'a S,
        config: ProcessConfig,
        mut correct: CorrectConfig,
        extend: ExtendConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        if !config.ecc {
            correct.pincer = false;
            correct.tail = false;
            correct.reassemble = false;
        }
        Ok(ReadProcessor {
            corrector: ReadCorrector::new(store, correct)?,
            extender: ReadExtender::new(store, extend)?,
            config,
        })
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Processes one read. Returns true when its mate should be discarded
    /// along with it. Reads already discarded are left alone.
    pub fn process_read(&self, read: &mut Read, has_mate: bool, s: &mut CorrectScratch, stats: &mut ProcessStats) -> bool {
        let c = &self.config;
        if read.discarded {
            return false;
        }
        let mate_follows = has_mate && !c.require_both_bad;

        if c.ecc || self.corrector.config().mark_bad_bases > 0 {
            self.corrector.error_correct(read, s);
            let t = &s.tracker;
            if t.marked > 0 {
                stats.reads_marked += 1;
                stats.bases_marked += t.marked as u64;
            }
            if t.rollback {
                stats.rollbacks += 1;
            }
            let (detected, corrected) = (t.detected(), t.corrected());
            if detected > 0 {
                stats.reads_detected += 1;
                stats.bases_detected += detected as u64;
                if corrected > 0 {
                    stats.reads_corrected += 1;
                    stats.bases_corrected_pincer += t.corrected_pincer as u64;
                    stats.bases_corrected_tail += t.corrected_tail as u64;
                    stats.bases_corrected_reassemble += t.corrected_reassemble() as u64;
                }
                if corrected == detected || (corrected > 0 && self.corrector.remaining_errors(read, s) == 0) {
                    stats.reads_fully_corrected += 1;
                } else if c.discard_uncorrectable {
                    read.discarded = true;
                    stats.uncorrectable_reads += 1;
                    return mate_follows;
                }
            }
        }

        if c.toss_junk && self.extender.is_junk(read) {
            read.discarded = true;
            stats.junk_reads += 1;
            return mate_follows;
        }

        if let Some(depth) = c.discard_low_depth {
            if self.extender.has_kmers_at_or_below(read, depth, c.low_depth_fraction) {
                read.discarded = true;
                stats.low_depth_reads += 1;
                return mate_follows;
            }
        }

        if c.extend_left > 0 || c.extend_right > 0 {
            let (left, right) = self.extender.extend_both(read, c.extend_left, c.extend_right, c.extension_rollback);
            if left + right > 0 {
                stats.reads_extended += 1;
                stats.bases_extended += (left + right) as u64;
            }
        }
        false
    }

    pub fn process_pair(&self, pair: &mut ReadPair, s: &mut CorrectScratch, stats: &mut ProcessStats) {
        for read in pair.reads() {
            stats.reads_in += 1;
            stats.bases_in += read.len() as u64;
            if read.discarded {
                stats.lowq_reads += 1;
                stats.lowq_bases += read.len() as u64;
            }
        }
        let has_mate = pair.r2.is_some();
        if self.process_read(&mut pair.r1, has_mate, s, stats) {
            if let Some(r2) = pair.r2.as_mut() {
                r2.discarded = true;
            }
        }
        if let Some(r2) = pair.r2.as_mut() {
            if self.process_read(r2, true, s, stats) {
                pair.r1.discarded = true;
            }
        }
    }

    /// Processes every pair in place on `config.threads` workers.
    pub fn process_all(&self, pairs: &mut [ReadPair]) -> Result<ProcessStats, Error> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        let mut stats = pool.install(|| {
            pairs
                .par_iter_mut()
                .map_init(CorrectScratch::new, |s, pair| {
                    let mut stats = ProcessStats::default();
                    self.process_pair(pair, s, &mut stats);
                    stats
                })
                .reduce(ProcessStats::default, Add::add)
        });

        // mates discarded after their own pass are only known now
        for read in pairs.iter().flat_map(ReadPair::reads).filter(|r| r.discarded) {
            stats.reads_discarded += 1;
            stats.bases_discarded += read.len() as u64;
        }
        stats.reads_discarded -= stats.lowq_reads;
        stats.bases_discarded = stats.bases_discarded.saturating_sub(stats.lowq_bases);
        debug!("Processed {} reads in {:?}", stats.reads_in, start.elapsed());
        stats.log_summary();
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::KmerType;
    use crate::kmer_table::KmerTable;
    use crate::test_utils::{random_dna, table_from};

    fn genome_table(seed: u64) -> (Vec<u8>, KmerTable<KmerType>) {
        let genome = random_dna(seed, 300);
        let table = table_from(&[(&genome[..], 20)]);
        (genome, table)
    }

    fn processor(table: &KmerTable<KmerType>, config: ProcessConfig) -> ReadProcessor<'_, KmerType, KmerTable<KmerType>> {
        let correct = CorrectConfig {
            reassemble: false,
            ..CorrectConfig::default()
        };
        ReadProcessor::new(table, config, correct, ExtendConfig::default()).unwrap()
    }

    fn substituted(genome: &[u8], pos: usize) -> Vec<u8> {
        let mut bases = genome[50..150].to_vec();
        bases[pos] = if bases[pos] == b'A' { b'C' } else { b'A' };
        bases
    }

    #[test]
    fn substitution_is_corrected() {
        let (genome, table) = genome_table(70);
        let proc = processor(&table, ProcessConfig::default());

        let read = Read::new("r", 0, substituted(&genome, 50), Some(vec![30; 100]));
        let mut pairs = vec![ReadPair::single(read)];
        let stats = proc.process_all(&mut pairs).unwrap();

        assert_eq!(pairs[0].r1.bases, genome[50..150].to_vec());
        assert_eq!(stats.reads_in, 1);
        assert_eq!(stats.reads_detected, 1);
        assert_eq!(stats.reads_corrected, 1);
        assert_eq!(stats.reads_fully_corrected, 1);
        assert_eq!(stats.bases_corrected(), 1);
        assert_eq!(stats.reads_discarded, 0);
    }

    #[test]
    fn read_against_its_own_kmers_is_kept() {
        let bases = random_dna(78, 150);
        let table: KmerTable<KmerType> = table_from(&[(&bases[..], 1)]);
        let config = ProcessConfig {
            discard_uncorrectable: true,
            ..ProcessConfig::default()
        };
        let proc = processor(&table, config);

        let mut pairs = vec![ReadPair::single(Read::new("r", 0, bases.clone(), Some(vec![30; 150])))];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert_eq!(pairs[0].r1.bases, bases);
        assert_eq!(stats.bases_corrected(), 0);
        assert_eq!(stats.reads_discarded, 0);
    }

    #[test]
    fn without_ecc_errors_stay() {
        let (genome, table) = genome_table(71);
        let config = ProcessConfig {
            ecc: false,
            ..ProcessConfig::default()
        };
        let proc = processor(&table, config);

        let bases = substituted(&genome, 50);
        let mut pairs = vec![ReadPair::single(Read::new("r", 0, bases.clone(), None))];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert_eq!(pairs[0].r1.bases, bases);
        assert_eq!(stats.reads_detected, 0);
    }

    #[test]
    fn uncorrectable_read_takes_its_mate() {
        let (genome, table) = genome_table(72);
        let mut bases = genome[..120].to_vec();
        bases[45..75].copy_from_slice(&random_dna(73, 30));
        let r1 = Read::new("bad", 0, bases, Some(vec![30; 120]));
        let r2 = Read::new("good", 0, genome[150..250].to_vec(), Some(vec![30; 100]));

        let config = ProcessConfig {
            discard_uncorrectable: true,
            ..ProcessConfig::default()
        };
        let proc = processor(&table, config.clone());
        let mut pairs = vec![ReadPair::paired(r1.clone(), r2.clone())];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert!(pairs[0].r1.discarded);
        assert!(pairs[0].r2.as_ref().unwrap().discarded);
        assert_eq!(stats.uncorrectable_reads, 1);
        assert_eq!(stats.reads_discarded, 2);
        assert_eq!(stats.bases_discarded, 220);

        let both_bad = ProcessConfig {
            require_both_bad: true,
            ..config
        };
        let proc = processor(&table, both_bad);
        let mut pairs = vec![ReadPair::paired(r1, r2)];
        proc.process_all(&mut pairs).unwrap();
        assert!(pairs[0].r1.discarded);
        assert!(!pairs[0].r2.as_ref().unwrap().discarded);
    }

    #[test]
    fn junk_and_low_depth_filters() {
        let genome = random_dna(74, 300);
        let table: KmerTable<KmerType> = table_from(&[(&genome[..150], 20), (&genome[150..], 2)]);
        let config = ProcessConfig {
            ecc: false,
            toss_junk: true,
            discard_low_depth: Some(2),
            low_depth_fraction: 0.5,
            ..ProcessConfig::default()
        };
        let proc = processor(&table, config);

        let mut pairs = vec![
            ReadPair::single(Read::new("deep", 0, genome[..100].to_vec(), None)),
            ReadPair::single(Read::new("junk", 1, random_dna(75, 100), None)),
            ReadPair::single(Read::new("shallow", 2, genome[180..280].to_vec(), None)),
        ];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert!(!pairs[0].r1.discarded);
        assert!(pairs[1].r1.discarded);
        assert!(pairs[2].r1.discarded);
        assert_eq!(stats.junk_reads, 1);
        assert_eq!(stats.low_depth_reads, 1);
        assert_eq!(stats.reads_discarded, 2);
    }

    #[test]
    fn reads_are_extended() {
        let (genome, table) = genome_table(76);
        let config = ProcessConfig {
            extend_left: 20,
            extend_right: 20,
            ..ProcessConfig::default()
        };
        let proc = processor(&table, config);

        let mut pairs = vec![ReadPair::single(Read::new("r", 0, genome[100..200].to_vec(), None))];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert_eq!(pairs[0].r1.bases, genome[80..220].to_vec());
        assert_eq!(stats.reads_extended, 1);
        assert_eq!(stats.bases_extended, 40);
    }

    #[test]
    fn prediscarded_reads_pass_through() {
        let (genome, table) = genome_table(77);
        let proc = processor(&table, ProcessConfig::default());
        let mut read = Read::new("r", 0, substituted(&genome, 50), None);
        read.discarded = true;
        let before = read.clone();

        let mut pairs = vec![ReadPair::single(read)];
        let stats = proc.process_all(&mut pairs).unwrap();
        assert_eq!(pairs[0].r1, before);
        assert_eq!(stats.lowq_reads, 1);
        assert_eq!(stats.reads_discarded, 0);
    }
}
