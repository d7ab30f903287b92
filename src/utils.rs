// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! FASTA/FASTQ input and output. Files ending in `.gz` are (de)compressed
//! on the fly; the format of an input is sniffed from its first byte.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Error};
use bio::io::{fasta, fastq};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::config::DEFAULT_QUALITY;
use crate::contigs::Contig;
use crate::read::{Read, ReadPair};

const PHRED_OFFSET: u8 = 33;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqFormat {
    Fasta,
    Fastq,
}

impl SeqFormat {
    /// Picks the output format from a file name; FASTQ unless it looks like FASTA.
    pub fn from_path<P: AsRef<Path>>(path: P) -> SeqFormat {
        let name = path.as_ref().to_string_lossy().to_ascii_lowercase();
        let name = name.trim_end_matches(".gz");
        if name.ends_with(".fa") || name.ends_with(".fasta") || name.ends_with(".fna") {
            SeqFormat::Fasta
        } else {
            SeqFormat::Fastq
        }
    }
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

pub fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>, Error> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn create_writer<P: AsRef<Path>>(path: P) -> Result<Box<dyn Write + Send>, Error> {
    let path = path.as_ref();
    let file = File::create(path)?;
    if is_gzipped(path) {
        Ok(Box::new(BufWriter::new(GzEncoder::new(file, Compression::default()))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Reads every record of a FASTA or FASTQ stream. Numeric ids count up
/// from `first_id`; FASTQ qualities are converted to Phred scores.
pub fn read_records<R: BufRead>(mut reader: R, first_id: u64) -> Result<Vec<Read>, Error> {
    let first = match reader.fill_buf()?.first() {
        Some(&b) => b,
        None => return Ok(Vec::new()),
    };

    let mut reads = Vec::new();
    match first {
        b'>' => {
            for (i, record) in fasta::Reader::new(reader).records().enumerate() {
                let record = record?;
                reads.push(Read::new(record.id(), first_id + i as u64, record.seq().to_vec(), None));
            }
        }
        b'@' => {
            for (i, record) in fastq::Reader::new(reader).records().enumerate() {
                let record = record?;
                let quals = record.qual().iter().map(|q| q.saturating_sub(PHRED_OFFSET)).collect();
                reads.push(Read::new(
                    record.id(),
                    first_id + i as u64,
                    record.seq().to_vec(),
                    Some(quals),
                ));
            }
        }
        other => bail!("unrecognized sequence format, first byte {:?}", other as char),
    }
    Ok(reads)
}

pub fn read_sequences<P: AsRef<Path>>(path: P) -> Result<Vec<Read>, Error> {
    let path = path.as_ref();
    let reads = read_records(open_reader(path)?, 0)?;
    info!("Read {} sequences from {}", reads.len(), path.display());
    Ok(reads)
}

/// Loads single or paired reads. Mates share the pair's numeric id.
pub fn read_pairs<P: AsRef<Path>>(r1: P, r2: Option<P>) -> Result<Vec<ReadPair>, Error> {
    let first = read_sequences(r1)?;
    let pairs = match r2 {
        None => first.into_iter().map(ReadPair::single).collect(),
        Some(r2) => {
            let second = read_sequences(r2)?;
            if first.len() != second.len() {
                bail!("mate files differ in length: {} vs {}", first.len(), second.len());
            }
            first
                .into_iter()
                .zip(second)
                .map(|(a, b)| ReadPair::paired(a, b))
                .collect()
        }
    };
    Ok(pairs)
}

pub fn write_contigs<W: Write>(contigs: &[Contig], writer: W) -> Result<(), Error> {
    let mut writer = fasta::Writer::new(writer);
    for contig in contigs {
        let id = format!("contig_{},length={},cov={:.1}", contig.id, contig.len(), contig.coverage);
        writer.write(&id, None, &contig.bases)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_read<W: Write>(read: &Read, format: SeqFormat, fa: &mut Option<fasta::Writer<W>>, fq: &mut Option<fastq::Writer<W>>) -> io::Result<()> {
    match (format, fa, fq) {
        (SeqFormat::Fasta, Some(w), _) => w.write(&read.id, None, &read.bases),
        (SeqFormat::Fastq, _, Some(w)) => {
            let quals: Vec<u8> = match read.quals.as_ref() {
                Some(q) => q.iter().map(|q| q + PHRED_OFFSET).collect(),
                None => vec![DEFAULT_QUALITY + PHRED_OFFSET; read.len()],
            };
            w.write(&read.id, None, &read.bases, &quals)
        }
        _ => Ok(()),
    }
}

/// Writes the reads of `pairs` whose discard flag equals `discarded`,
/// mates interleaved. Returns the number of reads written.
pub fn write_reads<W: Write>(pairs: &[ReadPair], writer: W, format: SeqFormat, discarded: bool) -> Result<usize, Error> {
    let (mut fa, mut fq) = match format {
        SeqFormat::Fasta => (Some(fasta::Writer::new(writer)), None),
        SeqFormat::Fastq => (None, Some(fastq::Writer::new(writer))),
    };
    let mut written = 0;
    for read in pairs.iter().flat_map(ReadPair::reads) {
        if read.discarded == discarded {
            write_read(read, format, &mut fa, &mut fq)?;
            written += 1;
        }
    }
    if let Some(w) = fa.as_mut() {
        w.flush()?;
    }
    if let Some(w) = fq.as_mut() {
        w.flush()?;
    }
    Ok(written)
}
