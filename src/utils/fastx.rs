use seq_io::fasta::Reader as FastaReader;
use seq_io::fastq::{Reader as FastqReader, Record as FastqRecord};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use crate::config::defs::{FASTA_EXTS, FASTA_TAG, FASTQ_EXTS, FASTQ_TAG};
use crate::utils::file::{open_reader, write_atomically, FileReader};


/// Enum to hold either FASTA or FASTQ reader
pub enum SequenceReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

/// Creates a SequenceReader for either FASTA or FASTQ files, plain or gzipped.
///
/// # Arguments
///
/// * `path` - Valid path to a fastx file.
///
/// # Returns
/// io::Result<SequenceReader>: Result bearing the correct SequenceReader.
///
pub fn sequence_reader(path: &Path) -> io::Result<SequenceReader> {
    let reader = open_reader(path)?;
    match fastx_filetype(path)? {
        FASTA_TAG => Ok(SequenceReader::Fasta(FastaReader::new(reader))),
        _ => Ok(SequenceReader::Fastq(FastqReader::new(reader))),
    }
}


/// Determines if a file path is a FASTA, FASTQ, or neither.
/// Checks extensions, not the body. A trailing `.gz` is ignored.
///
/// # Arguments
///
/// * `path` - Path of a fastx file.
///
/// # Returns
/// io::Result<&str>. Ok fastq or fasta, or err.
///
fn fastx_filetype(path: &Path) -> io::Result<&'static str> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let ext = name.rsplit('.').next().unwrap_or("");

    if FASTA_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
        return Ok(FASTA_TAG);
    }
    if FASTQ_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
        return Ok(FASTQ_TAG);
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "File '{}' has invalid extension '{}'. Expected FASTA ({:?}) or FASTQ ({:?}).",
            path.display(),
            ext,
            FASTA_EXTS,
            FASTQ_EXTS
        ),
    ))
}


/// Counts the number of records in a FASTA or FASTQ, decompressing if needed.
///
/// # Arguments
///
/// * `path` - Valid path to a fastx file.
///
/// # Returns
/// u64: Number of records.
///
pub fn record_counter(path: &Path) -> Result<u64> {
    let mut counter = 0;
    match sequence_reader(path)? {
        SequenceReader::Fasta(mut reader) => {
            while let Some(record) = reader.next() {
                record.map_err(|e| anyhow!("Bad FASTA record in {}: {}", path.display(), e))?;
                counter += 1;
            }
        }
        SequenceReader::Fastq(mut reader) => {
            while let Some(record) = reader.next() {
                record.map_err(|e| anyhow!("Bad FASTQ record in {}: {}", path.display(), e))?;
                counter += 1;
            }
        }
    }
    Ok(counter)
}


pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(head)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n")?;
    Ok(())
}


/// Projects 4-line FASTQ records to 2-line FASTA records (`>` + header, sequence).
/// Streams one record at a time; the output appears atomically.
///
/// # Arguments
///
/// * `fastq_path` - Joined reads.
/// * `fasta_path` - Destination.
///
/// # Returns
/// u64: Number of records written.
///
pub fn fastq_to_fasta(fastq_path: &Path, fasta_path: &Path) -> Result<u64> {
    let mut reader = FastqReader::new(open_reader(fastq_path)?);
    let mut bad_record: Option<anyhow::Error> = None;

    let written = write_atomically(fasta_path, |writer| {
        let mut n = 0u64;
        while let Some(record) = reader.next() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    bad_record = Some(anyhow!("Bad FASTQ record in {}: {}", fastq_path.display(), e));
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "bad FASTQ record"));
                }
            };
            write_fasta_record(writer, record.head(), record.seq())?;
            n += 1;
        }
        Ok(n)
    });

    match (written, bad_record) {
        (_, Some(e)) => Err(e),
        (Ok(n), None) => Ok(n),
        (Err(e), None) => Err(e.into()),
    }
}


/// Concatenates files byte-for-byte, in the given order, into `output`.
/// The destination is replaced only once every input has been copied.
///
/// # Arguments
///
/// * `inputs` - Files to merge, in order. Missing files are an error.
/// * `output` - Merged file.
///
/// # Returns
/// u64: Bytes written.
///
pub fn concatenate(inputs: &[PathBuf], output: &Path) -> io::Result<u64> {
    write_atomically(output, |writer| {
        let mut total = 0u64;
        for input in inputs {
            let mut reader = BufReader::new(File::open(input)?);
            total += io::copy(&mut reader, writer)?;
        }
        Ok(total)
    })
}


/// Calls `f` with every non-empty sequence in a FASTA file, in file order.
///
/// # Arguments
///
/// * `fasta_path` - Plain or gzipped FASTA.
/// * `f` - Visitor.
///
/// # Returns
/// u64: Number of sequences visited.
///
pub fn for_each_sequence<F>(fasta_path: &Path, mut f: F) -> Result<u64>
where
    F: FnMut(&[u8]),
{
    let mut reader = FastaReader::new(open_reader(fasta_path)?);
    let mut visited = 0;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| anyhow!("Bad FASTA record in {}: {}", fasta_path.display(), e))?;
        let seq = record.full_seq();
        let seq = seq.strip_suffix(b"\r").unwrap_or(&seq[..]);
        if seq.is_empty() {
            continue;
        }
        f(seq);
        visited += 1;
    }
    Ok(visited)
}
