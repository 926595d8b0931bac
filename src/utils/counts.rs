// src/utils/counts.rs: Exact-match dereplication and count tables

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use anyhow::{anyhow, Result};
use fxhash::FxHashMap;
use crate::config::defs::{COUNT_HEADER_FIELD, FREQ_DECIMALS};
use crate::utils::fastx::for_each_sequence;
use crate::utils::file::write_atomically;
use crate::utils::stats::percentage;

const UNIQUE_LABEL: &str = "number of unique sequences";
const TOTAL_LABEL: &str = "total number of molecules";


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountEntry {
    /// Raw sequence bytes, written back unchanged.
    pub sequence: Vec<u8>,
    pub count: u64,
}

/// Unique sequences with their read counts, ordered by count descending and
/// then by sequence in ascending byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountTable {
    entries: Vec<CountEntry>,
    total: u64,
}

/// Frequency map scoped to a single sample and alphabet.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    counts: FxHashMap<Vec<u8>, u64>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        SequenceCounter::default()
    }

    pub fn add(&mut self, seq: &[u8]) {
        self.add_n(seq, 1);
    }

    pub fn add_n(&mut self, seq: &[u8], n: u64) {
        match self.counts.get_mut(seq) {
            Some(count) => *count += n,
            None => {
                self.counts.insert(seq.to_vec(), n);
            }
        }
    }

    pub fn finish(self) -> CountTable {
        let mut entries: Vec<CountEntry> = self
            .counts
            .into_iter()
            .map(|(sequence, count)| CountEntry { sequence, count })
            .collect();
        entries.sort_unstable_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        let total = entries.iter().map(|e| e.count).sum();
        CountTable { entries, total }
    }
}

impl CountTable {
    /// Dereplicates every sequence of a FASTA file.
    pub fn from_fasta(path: &Path) -> Result<CountTable> {
        let mut counter = SequenceCounter::new();
        for_each_sequence(path, |seq| counter.add(seq))?;
        Ok(counter.finish())
    }

    /// Collapses `(sequence, count)` pairs, summing counts of repeated keys.
    pub fn from_weighted<I, S>(rows: I) -> CountTable
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<[u8]>,
    {
        let mut counter = SequenceCounter::new();
        for (seq, n) in rows {
            counter.add_n(seq.as_ref(), n);
        }
        counter.finish()
    }

    pub fn unique(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn entries(&self) -> &[CountEntry] {
        &self.entries
    }

    pub fn frequency(&self, count: u64) -> f64 {
        percentage(count, self.total)
    }

    pub fn render<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{} = {}", UNIQUE_LABEL, self.unique())?;
        writeln!(writer, "{} = {}", TOTAL_LABEL, self.total)?;
        writeln!(writer)?;
        for entry in &self.entries {
            writer.write_all(&entry.sequence)?;
            writeln!(
                writer,
                " {} {:.*}%",
                entry.count,
                FREQ_DECIMALS,
                self.frequency(entry.count)
            )?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        write_atomically(path, |w| self.render(w))
    }

    /// Reads a count table back, checking rows against the declared header.
    pub fn read(path: &Path) -> Result<CountTable> {
        let (unique, total) = read_count_header(path)?;
        let rows = read_count_rows(path)?;
        let table = CountTable::from_weighted(rows);
        if table.unique() != unique || table.total() != total {
            return Err(anyhow!(
                "{} declares {} unique / {} total but holds {} / {}",
                path.display(),
                unique,
                total,
                table.unique(),
                table.total()
            ));
        }
        Ok(table)
    }
}


/// Reads `(unique, total)` from the first two lines of a count table. The
/// values are taken by whitespace field position, not by label.
pub fn read_count_header(path: &Path) -> Result<(u64, u64)> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let mut field = |which: &str| -> Result<u64> {
        let line = lines
            .next()
            .ok_or_else(|| anyhow!("{}: missing {} header line", path.display(), which))??;
        line.split_whitespace()
            .nth(COUNT_HEADER_FIELD)
            .ok_or_else(|| anyhow!("{}: short {} header line '{}'", path.display(), which, line))?
            .parse::<u64>()
            .map_err(|e| anyhow!("{}: bad {} value in '{}': {}", path.display(), which, line, e))
    };
    let unique = field("unique")?;
    let total = field("total")?;
    Ok((unique, total))
}


/// Reads `(sequence, count)` rows of a count table, skipping the two header
/// lines and the blank separator. Columns after the count are ignored and
/// sequences are kept as raw bytes.
pub fn read_count_rows(path: &Path) -> Result<Vec<(Vec<u8>, u64)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (i, line) in reader.split(b'\n').enumerate().skip(3) {
        let line = line?;
        let mut fields = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|field| !field.is_empty());
        let Some(seq) = fields.next() else {
            continue;
        };
        let count = fields
            .next()
            .ok_or_else(|| anyhow!("{}:{}: missing count", path.display(), i + 1))?;
        let count = std::str::from_utf8(count)
            .map_err(|e| anyhow!("{}:{}: bad count: {}", path.display(), i + 1, e))?
            .parse::<u64>()
            .map_err(|e| anyhow!("{}:{}: bad count: {}", path.display(), i + 1, e))?;
        rows.push((seq.to_vec(), count));
    }
    Ok(rows)
}
