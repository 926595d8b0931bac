// src/utils/metrics.rs: Per-sample recovery metrics and the run log

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use anyhow::Result;
use crate::config::defs::RECOVERY_DECIMALS;
use crate::utils::counts::read_count_header;
use crate::utils::fastx::record_counter;
use crate::utils::file::write_atomically;
use crate::utils::stats::{format_percent, percentage};


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub unique: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryLogRow {
    pub sample: String,
    pub raw_r1: u64,
    pub raw_r2: u64,
    pub nt: TableCounts,
    pub aa: Option<TableCounts>,
}

impl RecoveryLogRow {
    pub fn recovered_nt(&self) -> f64 {
        percentage(self.nt.total, self.raw_r1)
    }

    pub fn recovered_aa(&self) -> Option<f64> {
        self.aa.map(|aa| percentage(aa.total, self.raw_r1))
    }
}


/// Raw inputs and finished count tables of one sample.
pub struct RecoverySources<'a> {
    pub sample: &'a str,
    pub r1: &'a [PathBuf],
    pub r2: &'a [PathBuf],
    pub nt_counts: &'a Path,
    pub aa_counts: Option<&'a Path>,
}

/// Builds a sample's log row. Read-only: raw FASTQs are counted (decompressed
/// as needed) and the count tables contribute only their header values.
///
/// # Arguments
///
/// * `sources` - Inputs of one sample; run only after its tables are final.
///
/// # Returns
/// RecoveryLogRow
pub fn recovery_row(sources: &RecoverySources) -> Result<RecoveryLogRow> {
    let mut raw_r1 = 0;
    for path in sources.r1 {
        raw_r1 += record_counter(path)?;
    }
    let mut raw_r2 = 0;
    for path in sources.r2 {
        raw_r2 += record_counter(path)?;
    }

    let (unique, total) = read_count_header(sources.nt_counts)?;
    let aa = match sources.aa_counts {
        Some(path) => {
            let (unique, total) = read_count_header(path)?;
            Some(TableCounts { unique, total })
        }
        None => None,
    };

    Ok(RecoveryLogRow {
        sample: sources.sample.to_string(),
        raw_r1,
        raw_r2,
        nt: TableCounts { unique, total },
        aa,
    })
}


/// Diagnostics followed by the recovery table. Rows are keyed by discovery
/// index and written in that order whatever order they arrive in.
#[derive(Debug, Default)]
pub struct RunLog {
    translate: bool,
    diagnostics: Vec<String>,
    rows: Vec<(usize, RecoveryLogRow)>,
}

impl RunLog {
    pub fn new(translate: bool) -> Self {
        RunLog {
            translate,
            ..RunLog::default()
        }
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.diagnostics.push(line.into());
    }

    pub fn push_row(&mut self, discovery_index: usize, row: RecoveryLogRow) {
        self.rows.push((discovery_index, row));
    }

    pub fn rows(&self) -> impl Iterator<Item = &RecoveryLogRow> {
        self.rows.iter().map(|(_, r)| r)
    }

    pub fn render<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for line in &self.diagnostics {
            writeln!(writer, "{}", line)?;
        }
        writeln!(writer)?;

        write!(writer, "sample\tfastq_R1\tfastq_R2\tunique_nt\ttotal_nt\trecovered_nt(%)")?;
        if self.translate {
            write!(writer, "\tunique_aa\ttotal_aa\trecovered_aa(%)")?;
        }
        writeln!(writer)?;

        let mut ordered: Vec<&(usize, RecoveryLogRow)> = self.rows.iter().collect();
        ordered.sort_by_key(|(idx, _)| *idx);
        for (_, row) in ordered {
            write!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                row.sample,
                row.raw_r1,
                row.raw_r2,
                row.nt.unique,
                row.nt.total,
                format_percent(row.recovered_nt(), RECOVERY_DECIMALS)
            )?;
            if self.translate {
                let aa = row.aa.unwrap_or_default();
                write!(
                    writer,
                    "\t{}\t{}\t{}",
                    aa.unique,
                    aa.total,
                    format_percent(row.recovered_aa().unwrap_or(0.0), RECOVERY_DECIMALS)
                )?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        write_atomically(path, |w| self.render(w))
    }
}
