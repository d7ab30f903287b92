// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

use std::fs;
use std::path::Path;

use anyhow::Error;
use debruijn::Kmer;
use docopt::Docopt;
use log::info;
use serde::Deserialize;

use debruijn_walk::config::{
    BuildConfig, CorrectConfig, ExtendConfig, KmerType, LargeKmerType, ProcessConfig, ShaveConfig,
};
use debruijn_walk::contigs::{BuildMode, ContigBuilder};
use debruijn_walk::kmer_table::KmerTable;
use debruijn_walk::process::ReadProcessor;
use debruijn_walk::read::ReadPair;
use debruijn_walk::shaver::{self, Shaver};
use debruijn_walk::utils::{self, SeqFormat};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "
De Bruijn graph walking: contigs, read correction and read extension

Usage:
  dbg-walk contig [options] -o FILE <reads>...
  dbg-walk correct [options] -o FILE <r1> [<r2>]
  dbg-walk extend [options] -o FILE <r1> [<r2>]
  dbg-walk -h | --help | -v | --version

Options:
  -o --out FILE              Output file; .gz compresses, .fa/.fasta writes FASTA.
  --discarded FILE           Also write discarded reads to FILE.
  -t --threads N             Worker threads [default: 2].
  -l --long                  Use 40-mers instead of 24-mers.
  --min-count N              Drop k-mers seen fewer than N times [default: 2].
  --shave                    Remove tips and bubbles before walking.
  --shave-depth N            Deepest count a removed path may enter [default: 4].
  --min-seed N               Lowest count of a contig seed [default: 3].
  --min-len N                Shortest contig emitted [default: 100].
  --min-cov X                Lowest mean contig coverage [default: 1.0].
  --tiered                   Seed contigs in passes of falling depth.
  --ecc                      Error-correct reads before extending them.
  --extend-left N            Extend reads leftward by up to N bases [default: 0].
  --extend-right N           Extend reads rightward by up to N bases [default: 0].
  --discard-uncorrectable    Discard reads whose errors were not all fixed.
  --require-both-bad         Keep a pair unless both mates fail.
  --toss-junk                Discard reads disconnected from the graph.
  --mark N                   Mark bases lacking k-mer support of depth N [default: 0].
  -h --help                  Show this screen.
  -v --version               Show version.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_reads: Vec<String>,
    arg_r1: String,
    arg_r2: Option<String>,
    cmd_contig: bool,
    cmd_correct: bool,
    cmd_extend: bool,

    flag_out: String,
    flag_discarded: Option<String>,
    flag_threads: usize,
    flag_long: bool,
    flag_min_count: u32,
    flag_shave: bool,
    flag_shave_depth: u32,
    flag_min_seed: u32,
    flag_min_len: usize,
    flag_min_cov: f32,
    flag_tiered: bool,
    flag_ecc: bool,
    flag_extend_left: usize,
    flag_extend_right: usize,
    flag_discard_uncorrectable: bool,
    flag_require_both_bad: bool,
    flag_toss_junk: bool,
    flag_mark: u32,
    flag_version: bool,
}

fn count_kmers<K: Kmer + Send + Sync>(seqs: &[&[u8]], args: &Args) -> Result<KmerTable<K>, Error> {
    let trimmer = if args.flag_shave {
        Some(Shaver::new(ShaveConfig {
            min_count: args.flag_min_count,
            max_count: args.flag_shave_depth,
            threads: args.flag_threads,
            ..ShaveConfig::default()
        })?)
    } else {
        None
    };
    shaver::count_and_shave(seqs, args.flag_min_count, trimmer.as_ref())
}

fn build_contigs<K: Kmer + Send + Sync>(args: &Args) -> Result<(), Error> {
    let mut reads = Vec::new();
    for path in &args.arg_reads {
        reads.extend(utils::read_sequences(path)?);
    }
    let seqs: Vec<&[u8]> = reads.iter().map(|r| &r.bases[..]).collect();
    let table = count_kmers::<K>(&seqs, args)?;

    let builder = ContigBuilder::new(
        BuildConfig {
            min_count_seed: args.flag_min_seed,
            min_contig_len: args.flag_min_len,
            min_coverage: args.flag_min_cov,
            threads: args.flag_threads,
            ..BuildConfig::default()
        },
        ExtendConfig::default(),
    )?;
    let mode = if args.flag_tiered {
        BuildMode::Tiered
    } else {
        BuildMode::Single
    };
    let set = builder.build_contigs(&table, mode);

    info!("Writing {} contigs to {}", set.contigs.len(), args.flag_out);
    utils::write_contigs(&set.contigs, utils::create_writer(&args.flag_out)?)?;
    Ok(())
}

fn process_reads<K: Kmer + Send + Sync>(args: &Args) -> Result<(), Error> {
    let mut pairs = utils::read_pairs(&args.arg_r1, args.arg_r2.as_ref())?;
    let seqs: Vec<&[u8]> = pairs
        .iter()
        .flat_map(ReadPair::reads)
        .map(|r| &r.bases[..])
        .collect();
    let table = count_kmers::<K>(&seqs, args)?;

    let config = ProcessConfig {
        ecc: args.cmd_correct || (args.cmd_extend && args.flag_ecc),
        extend_left: args.flag_extend_left,
        extend_right: args.flag_extend_right,
        discard_uncorrectable: args.flag_discard_uncorrectable,
        require_both_bad: args.flag_require_both_bad,
        toss_junk: args.flag_toss_junk,
        threads: args.flag_threads,
        ..ProcessConfig::default()
    };
    let correct = CorrectConfig {
        mark_bad_bases: args.flag_mark,
        ..CorrectConfig::default()
    };
    let processor = ReadProcessor::new(&table, config, correct, ExtendConfig::default())?;
    processor.process_all(&mut pairs)?;

    let written = utils::write_reads(
        &pairs,
        utils::create_writer(&args.flag_out)?,
        SeqFormat::from_path(&args.flag_out),
        false,
    )?;
    info!("Wrote {} reads to {}", written, args.flag_out);
    if let Some(path) = args.flag_discarded.as_ref() {
        let written = utils::write_reads(&pairs, utils::create_writer(path)?, SeqFormat::from_path(path), true)?;
        info!("Wrote {} discarded reads to {}", written, path);
    }
    Ok(())
}

fn run<K: Kmer + Send + Sync>(args: &Args) -> Result<(), Error> {
    if args.cmd_contig {
        build_contigs::<K>(args)
    } else {
        process_reads::<K>(args)
    }
}

fn main() -> Result<(), Error> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_version {
        println!("{} {}", PKG_NAME, PKG_VERSION);
        return Ok(());
    }

    // initialize logger
    pretty_env_logger::init_timed();
    info!("Command line args:\n{:?}", args);

    if let Some(dir) = Path::new(&args.flag_out).parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    if args.flag_long {
        run::<LargeKmerType>(&args)?;
    } else {
        run::<KmerType>(&args)?;
    }

    info!("Done!");
    Ok(())
}
