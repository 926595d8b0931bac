// src/utils/layout.rs: Output directory layout and artifact naming

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use crate::config::defs::{COUNTS_AA_DIR, COUNTS_DIR, FASTAS_DIR, FASTQS_DIR, HISTOS_DIR, LANES_DIR, LOG_FILE};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alphabet {
    Nucleotide,
    AminoAcid,
}

impl Alphabet {
    pub fn tag(&self) -> &'static str {
        match self {
            Alphabet::Nucleotide => "nt",
            Alphabet::AminoAcid => "aa",
        }
    }
}

/// Point in the pipeline an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LaneJoined,
    LaneFasta,
    LaneJoinLog,
    SampleJoined,
    SampleFasta,
    Counts,
    PreMergeCounts,
    Histogram,
}

impl Stage {
    fn is_lane_level(&self) -> bool {
        matches!(self, Stage::LaneJoined | Stage::LaneFasta | Stage::LaneJoinLog)
    }
}

/// Identity of one file the pipeline produces. Paths are only ever built from
/// this, never recovered by trimming other file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub sample: String,
    pub lane: Option<String>,
    pub alphabet: Alphabet,
    pub stage: Stage,
}

impl ArtifactDescriptor {
    pub fn sample(sample: &str, alphabet: Alphabet, stage: Stage) -> Self {
        ArtifactDescriptor {
            sample: sample.to_string(),
            lane: None,
            alphabet,
            stage,
        }
    }

    pub fn lane(sample: &str, lane: &str, stage: Stage) -> Self {
        ArtifactDescriptor {
            sample: sample.to_string(),
            lane: Some(lane.to_string()),
            alphabet: Alphabet::Nucleotide,
            stage,
        }
    }
}


#[derive(Debug, Clone)]
pub struct RunLayout {
    pub root: PathBuf,
    pub translate: bool,
    pub retain_lanes: bool,
}

impl RunLayout {
    pub fn new(root: PathBuf, translate: bool, retain_lanes: bool) -> Self {
        RunLayout { root, translate, retain_lanes }
    }

    /// Creates every directory of the run. Safe to call on an existing layout.
    pub fn create(&self) -> io::Result<()> {
        for dir in [COUNTS_DIR, FASTAS_DIR, FASTQS_DIR, HISTOS_DIR, LANES_DIR] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        if self.translate {
            fs::create_dir_all(self.root.join(COUNTS_AA_DIR))?;
        }
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn lanes_dir(&self) -> PathBuf {
        self.root.join(LANES_DIR)
    }

    pub fn lane_dir(&self, lane: &str) -> PathBuf {
        self.lanes_dir().join(lane)
    }

    pub fn counts_dir(&self, alphabet: Alphabet) -> PathBuf {
        match alphabet {
            Alphabet::Nucleotide => self.root.join(COUNTS_DIR),
            Alphabet::AminoAcid => self.root.join(COUNTS_AA_DIR),
        }
    }

    /// Builds the path of an artifact.
    ///
    /// # Arguments
    ///
    /// * `desc` - Artifact identity. Lane-level stages require `desc.lane`.
    ///
    /// # Returns
    /// Absolute path under the run root.
    pub fn path(&self, desc: &ArtifactDescriptor) -> Result<PathBuf> {
        if desc.stage.is_lane_level() {
            let lane = desc
                .lane
                .as_deref()
                .ok_or_else(|| anyhow!("Stage {:?} needs a lane for sample {}", desc.stage, desc.sample))?;
            let file = match desc.stage {
                Stage::LaneJoined => format!("{}.joined.fastq", lane),
                Stage::LaneFasta => format!("{}.joined.fasta", lane),
                _ => format!("{}.pandaseq.log", lane),
            };
            return Ok(self.lane_dir(lane).join(file));
        }

        let sample = &desc.sample;
        let path = match (desc.stage, desc.alphabet) {
            (Stage::SampleJoined, _) => self.root.join(FASTQS_DIR).join(format!("{}.joined.fastq", sample)),
            (Stage::SampleFasta, _) => self.root.join(FASTAS_DIR).join(format!("{}.joined.fasta", sample)),
            (Stage::Counts, Alphabet::Nucleotide) => self.counts_dir(Alphabet::Nucleotide).join(format!("{}_counts.txt", sample)),
            (Stage::Counts, Alphabet::AminoAcid) => self.counts_dir(Alphabet::AminoAcid).join(format!("{}_counts.aa.txt", sample)),
            (Stage::PreMergeCounts, _) => self.counts_dir(Alphabet::AminoAcid).join(format!("{}_counts.aa.dup.txt", sample)),
            (Stage::Histogram, Alphabet::Nucleotide) => self.root.join(HISTOS_DIR).join(format!("{}_histo.txt", sample)),
            (Stage::Histogram, Alphabet::AminoAcid) => self.root.join(HISTOS_DIR).join(format!("{}_histo.aa.txt", sample)),
            (stage, _) => return Err(anyhow!("Unhandled stage {:?}", stage)),
        };
        Ok(path)
    }

    /// Removes the per-lane subtree unless the run keeps it.
    pub fn finalize_lanes(&self) -> io::Result<()> {
        let lanes = self.lanes_dir();
        if !self.retain_lanes && lanes.exists() {
            fs::remove_dir_all(&lanes)?;
        }
        Ok(())
    }
}

/// Resolves the output root: absolute paths as given, relative ones under the
/// input directory, `<input>/pipeline.output` when unset.
pub fn resolve_out_dir(input_dir: &Path, out_dir: Option<&str>, default_name: &str) -> PathBuf {
    match out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                input_dir.join(path)
            }
        }
        None => input_dir.join(default_name),
    }
}
