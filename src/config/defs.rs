use std::path::PathBuf;
use std::sync::Arc;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::sync::Semaphore;
use crate::cli::Arguments;
use crate::utils::layout::RunLayout;

// External software
pub const PANDASEQ_TAG: &str = "pandaseq";
pub const TRANSLATOR_TAG: &str = "translator";
pub const IDENTITY_TAG: &str = "identity";

// Built-in join flags; any of these named in --extra-flags replaces the default.
pub const PANDASEQ_DEFAULTS: &[(&str, Option<&str>)] = &[
    ("-t", Some("0.6")),
    ("-l", Some("1")),
    ("-A", Some("simple_bayesian")),
];

// Static directory and file names. Downstream consumers rely on these exactly.
pub const COUNTS_DIR: &str = "counts";
pub const COUNTS_AA_DIR: &str = "counts_aa";
pub const FASTAS_DIR: &str = "fastas";
pub const FASTQS_DIR: &str = "fastqs";
pub const HISTOS_DIR: &str = "histos";
pub const LANES_DIR: &str = "individual.lanes";
pub const LOG_FILE: &str = "log.txt";
pub const DEFAULT_OUT_DIR: &str = "pipeline.output";

// Static Parameters
pub const FREQ_DECIMALS: usize = 3;
pub const RECOVERY_DECIMALS: usize = 2;
pub const COUNT_HEADER_FIELD: usize = 5;

pub const FASTA_TAG : &str = "fasta";
pub const FASTQ_TAG : &str = "fastq";
pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "faa", "ffn", "frn"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];

lazy_static! {
    // <sample>_S#_L00#_R#_001.fastq[.gz]
    pub static ref ILLUMINA_FASTQ_RE: Regex =
        Regex::new(r"^(?P<sample>.+)_S(?P<snum>\d+)_L00(?P<lane>\d)_R(?P<read>[12])_001\.fastq(?:\.gz)?$")
            .expect("valid Illumina filename pattern");
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No input files: {0}")]
    InputValidation(String),

    #[error("Join failed for lane {lane}: {error}")]
    Join { lane: String, error: String },

    #[error("Tool execution failed for {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Counting inconsistency for {sample}: histogram holds {histogram} reads, count table declares {declared}")]
    CountingInconsistency { sample: String, histogram: u64, declared: u64 },

    #[error("Handoff of {path} failed: {error}")]
    Handoff { path: PathBuf, error: String },

    #[error("Malformed table {path}: {error}")]
    MalformedTable { path: PathBuf, error: String },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Errors that stop the run before any output exists.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, PipelineError::Configuration(_) | PipelineError::InputValidation(_))
    }

    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


pub struct RunConfig  {
    pub input_dir: PathBuf,
    pub layout: RunLayout,
    pub args: Arguments,
    pub lane_semaphore: Arc<Semaphore>,
}
