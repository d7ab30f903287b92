// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

pub mod config;
pub mod contigs;
pub mod correct;
pub mod dna;
pub mod error_tracker;
pub mod extend;
pub mod kmer_table;
pub mod process;
pub mod read;
pub mod shaver;
pub mod utils;
pub mod walker;
pub mod work_queue;

#[cfg(test)]
pub mod test_utils;
