// src/utils/discovery.rs: Groups an input directory into samples and lanes

use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use crate::config::defs::{PipelineError, ILLUMINA_FASTQ_RE};


/// One instrument lane: an R1/R2 pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    pub name: String,
    pub r1: PathBuf,
    pub r2: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: String,
    pub lanes: Vec<Lane>,
}


/// Scans `dir` for `<sample>_S#_L00#_R#_001.fastq[.gz]` files.
///
/// File names are visited in sorted order, so sample and lane order is
/// stable across platforms. R2 paths are derived from the R1 name.
///
/// # Arguments
///
/// * `dir` - Input directory.
///
/// # Returns
/// Samples in discovery order, each with its lanes in discovery order.
pub fn discover_samples(dir: &Path) -> Result<Vec<Sample>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::Configuration(format!(
            "Input directory {} does not exist",
            dir.display()
        )));
    }

    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".fastq"))
        .collect();
    names.sort();

    if names.is_empty() {
        return Err(PipelineError::InputValidation(format!(
            "no *.fastq* files in {}",
            dir.display()
        )));
    }

    let mut samples: Vec<Sample> = Vec::new();
    for name in &names {
        let Some(caps) = ILLUMINA_FASTQ_RE.captures(name) else {
            warn!("Skipping {}: name does not follow <sample>_S#_L00#_R#_001.fastq[.gz]", name);
            continue;
        };
        if &caps["read"] != "1" {
            continue;
        }

        // Everything before `_L00` names the sample, sample number included.
        let sample_name = format!("{}_S{}", &caps["sample"], &caps["snum"]);
        let lane_name = format!("{}_L00{}", sample_name, &caps["lane"]);
        let r2_name = r2_file_name(name);
        let lane = Lane {
            name: lane_name,
            r1: dir.join(name),
            r2: dir.join(&r2_name),
        };
        debug!("Discovered lane {} of sample {}", lane.name, sample_name);

        match samples.iter_mut().find(|s| s.name == sample_name) {
            Some(sample) => sample.lanes.push(lane),
            None => samples.push(Sample {
                name: sample_name,
                lanes: vec![lane],
            }),
        }
    }

    if samples.is_empty() {
        return Err(PipelineError::InputValidation(format!(
            "no R1 files named <sample>_S#_L00#_R1_001.fastq[.gz] in {}",
            dir.display()
        )));
    }
    Ok(samples)
}

/// Swaps the read-number token of an R1 file name.
pub fn r2_file_name(r1_name: &str) -> String {
    match r1_name.rfind("_R1_001") {
        Some(idx) => format!("{}_R2_001{}", &r1_name[..idx], &r1_name[idx + "_R1_001".len()..]),
        None => r1_name.to_string(),
    }
}
