// src/utils/histogram.rs: Read-weighted sequence length distributions

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use crate::config::defs::FREQ_DECIMALS;
use crate::utils::counts::CountTable;
use crate::utils::file::write_atomically;
use crate::utils::stats::percentage;


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthHistogram {
    pub total: u64,
    pub min: usize,
    pub max: usize,
    /// length -> reads, only lengths that occur, ascending.
    pub buckets: BTreeMap<usize, u64>,
}

impl LengthHistogram {
    /// Buckets every unique sequence by length, weighted by its read count.
    pub fn from_counts(table: &CountTable) -> LengthHistogram {
        let mut buckets = BTreeMap::new();
        for entry in table.entries() {
            *buckets.entry(entry.sequence.len()).or_insert(0u64) += entry.count;
        }
        let min = buckets.keys().next().copied().unwrap_or(0);
        let max = buckets.keys().next_back().copied().unwrap_or(0);
        LengthHistogram {
            total: table.total(),
            min,
            max,
            buckets,
        }
    }

    pub fn bucket_sum(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// Bucket reads must add up to a total declared elsewhere, such as the
    /// header of the table as persisted.
    ///
    /// # Returns
    ///
    /// Err((bucket_sum, declared)) on mismatch.
    pub fn check_against(&self, declared: u64) -> Result<(), (u64, u64)> {
        let sum = self.bucket_sum();
        if sum == declared {
            Ok(())
        } else {
            Err((sum, declared))
        }
    }

    pub fn render<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "#Reads: {}", self.total)?;
        writeln!(writer, "Min: {}", self.min)?;
        writeln!(writer, "Max: {}", self.max)?;
        writeln!(writer, "#Read Length Histogram:")?;
        writeln!(writer, "Len  Reads  %Reads")?;
        for (len, reads) in &self.buckets {
            writeln!(
                writer,
                "{}  {}  {:.*}%",
                len,
                reads,
                FREQ_DECIMALS,
                percentage(*reads, self.total)
            )?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        write_atomically(path, |w| self.render(w))
    }
}
