// src/pipelines/adapters.rs: Seams to the external join, translation and naming tools

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use crate::cli::Arguments;
use crate::config::defs::{PipelineError, IDENTITY_TAG, PANDASEQ_TAG, TRANSLATOR_TAG};
use crate::utils::command::{locate_program, run_tool, tool_version, ProgramLine, ToolOutcome};
use crate::utils::command::{identity, pandaseq, translator};
use crate::utils::discovery::Lane;


/// Files one lane join reads and writes.
pub struct LaneJoinRequest<'a> {
    pub lane: &'a Lane,
    pub out_fastq: &'a Path,
    pub log: &'a Path,
}

/// Joins the R1/R2 pair of one lane into 4-line records at `out_fastq`.
#[allow(async_fn_in_trait)]
pub trait ReadJoiner {
    async fn join(&self, request: &LaneJoinRequest<'_>) -> Result<ToolOutcome>;
}

/// Translates a nucleotide count table. The un-merged amino-acid table must
/// end up at `pre_merge`; it may hold repeated amino-acid rows.
#[allow(async_fn_in_trait)]
pub trait Translator {
    async fn translate(&self, counts_file: &Path, pre_merge: &Path) -> Result<ToolOutcome>;
}

/// Receives a finished count table. A successful outcome acknowledges that
/// the consumer has recorded it and the source may be deleted.
#[allow(async_fn_in_trait)]
pub trait IdentityStage {
    async fn submit(&self, counts_file: &Path) -> Result<ToolOutcome>;
}


/// Fails with a configuration error when `program` cannot be found.
pub fn require_program(tag: &str, program: &str) -> Result<PathBuf, PipelineError> {
    locate_program(program).ok_or_else(|| {
        PipelineError::Configuration(format!("{} ({}) not found on PATH", tag, program))
    })
}


pub struct PandaseqJoiner {
    program: String,
    threads: u32,
    primers: Option<(String, String)>,
    extra_flags: Option<String>,
    timeout: Duration,
}

impl PandaseqJoiner {
    pub fn from_args(args: &Arguments, timeout: Duration) -> Self {
        if args.primers().is_none()
            && (args.forward_primer.is_some() || args.reverse_primer.is_some())
        {
            warn!("Only one primer given; primer extraction is skipped but reads are still joined");
        }
        PandaseqJoiner {
            program: args.join_program.clone(),
            threads: args.threads,
            primers: args.primers().map(|(f, r)| (f.to_string(), r.to_string())),
            extra_flags: args.extra_flags.clone(),
            timeout,
        }
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        require_program(PANDASEQ_TAG, &self.program).map(|path| {
            debug!("{} found at {}", PANDASEQ_TAG, path.display());
        })
    }

    /// Logs the joiner's version line, if it reports one.
    pub async fn log_version(&self) {
        match tool_version(PANDASEQ_TAG, &self.program, "-v").await {
            Ok(version) => info!("{} version: {}", PANDASEQ_TAG, version),
            Err(e) => debug!("Could not read {} version: {}", PANDASEQ_TAG, e),
        }
    }
}

impl ReadJoiner for PandaseqJoiner {
    async fn join(&self, request: &LaneJoinRequest<'_>) -> Result<ToolOutcome> {
        let config = pandaseq::PandaseqConfig {
            r1: &request.lane.r1,
            r2: &request.lane.r2,
            out_fastq: request.out_fastq,
            log: request.log,
            threads: self.threads,
            primers: self.primers.as_ref().map(|(f, r)| (f.as_str(), r.as_str())),
            extra_flags: self.extra_flags.as_deref(),
        };
        let args = pandaseq::arg_generator(&config);
        run_tool(PANDASEQ_TAG, &self.program, &args, None, self.timeout).await
    }
}


const STAGED_COUNTS: &str = "counts.txt";

pub struct ExternalTranslator {
    line: ProgramLine,
    timeout: Duration,
}

impl ExternalTranslator {
    pub fn from_args(args: &Arguments, timeout: Duration) -> Result<Self, PipelineError> {
        let line = ProgramLine::parse(&args.translator)
            .map_err(|e| PipelineError::Configuration(format!("--translator: {}", e)))?;
        Ok(ExternalTranslator { line, timeout })
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        require_program(TRANSLATOR_TAG, &self.line.program).map(|_| ())
    }
}

impl Translator for ExternalTranslator {
    /// The translator names its output after the input's text before the
    /// first '.', in its working directory. Each call therefore runs in its
    /// own staging directory next to `pre_merge` on a dot-free copy.
    async fn translate(&self, counts_file: &Path, pre_merge: &Path) -> Result<ToolOutcome> {
        let out_dir = pre_merge
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", pre_merge.display()))?;
        let staging = tempfile::Builder::new().prefix(".translate-").tempdir_in(out_dir)?;
        let staged = staging.path().join(STAGED_COUNTS);
        fs::copy(counts_file, &staged)?;

        let args = translator::arg_generator(&self.line, &staged);
        let produced = translator::output_path(&staged);

        let outcome = run_tool(TRANSLATOR_TAG, &self.line.program, &args, Some(staging.path()), self.timeout).await?;
        if outcome.success {
            if !produced.exists() {
                return Err(anyhow!(
                    "{} exited 0 but left no {} for {}",
                    TRANSLATOR_TAG,
                    produced.display(),
                    counts_file.display()
                ));
            }
            move_file(&produced, pre_merge)?;
        }
        staging.close()?;
        Ok(outcome)
    }
}


pub struct ExternalIdentityStage {
    line: ProgramLine,
    timeout: Duration,
}

impl ExternalIdentityStage {
    pub fn from_args(args: &Arguments, timeout: Duration) -> Result<Option<Self>, PipelineError> {
        let Some(cmd) = args.identity_cmd.as_deref() else {
            return Ok(None);
        };
        let line = ProgramLine::parse(cmd)
            .map_err(|e| PipelineError::Configuration(format!("--identity-cmd: {}", e)))?;
        Ok(Some(ExternalIdentityStage { line, timeout }))
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        require_program(IDENTITY_TAG, &self.line.program).map(|_| ())
    }
}

impl IdentityStage for ExternalIdentityStage {
    async fn submit(&self, counts_file: &Path) -> Result<ToolOutcome> {
        let args = identity::arg_generator(&self.line, counts_file);
        run_tool(IDENTITY_TAG, &self.line.program, &args, None, self.timeout).await
    }
}


/// Rename, falling back to copy-then-delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)?;
    Ok(())
}
