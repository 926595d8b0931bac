// src/pipelines/dereplicate.rs: Paired reads to per-sample count tables, histograms and the recovery log

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::anyhow;
use futures::future::try_join_all;
use log::{debug, info, warn};
use tokio::task::{self, JoinError};
use crate::config::defs::{PipelineError, RunConfig, IDENTITY_TAG, PANDASEQ_TAG, TRANSLATOR_TAG};
use crate::pipelines::adapters::{IdentityStage, LaneJoinRequest, ReadJoiner, Translator};
use crate::utils::counts::{read_count_header, read_count_rows, CountTable};
use crate::utils::discovery::{Lane, Sample};
use crate::utils::fastx::{concatenate, fastq_to_fasta};
use crate::utils::file::{remove_if_exists, PartialOutput};
use crate::utils::histogram::LengthHistogram;
use crate::utils::layout::{Alphabet, ArtifactDescriptor, RunLayout, Stage};
use crate::utils::metrics::{recovery_row, RecoveryLogRow, RecoverySources, RunLog};


#[derive(Debug)]
pub struct RunSummary {
    pub samples: usize,
    pub lanes: usize,
    pub failed_lanes: usize,
    pub inconsistencies: usize,
    pub handoff_failures: usize,
    pub rows: Vec<RecoveryLogRow>,
    pub log_path: PathBuf,
}

/// Outcome of joining and converting one lane.
struct LaneResult {
    sample_idx: usize,
    fastq: Option<PathBuf>,
    fasta: Option<PathBuf>,
    diagnostic: String,
}

/// What one sample contributes to the run log.
struct SampleReport {
    row: RecoveryLogRow,
    nt_counts: PathBuf,
    aa_counts: Option<PathBuf>,
    diagnostics: Vec<String>,
    inconsistencies: usize,
}


pub fn progress(pct: u8, message: &str) {
    println!("[{:>3}%] {}", pct, message);
}

fn blocking_failed(e: JoinError) -> PipelineError {
    PipelineError::Other(anyhow!("Blocking task failed: {}", e))
}


/// Runs the whole pipeline over discovered samples.
///
/// The output layout is created here, so callers validate inputs and tool
/// presence first. Dropping the returned future cancels the run: running
/// tools are killed and partially written outputs removed.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `samples` - Samples in discovery order.
/// * `joiner` - Lane join adapter.
/// * `translator` - Used only when the layout translates.
/// * `identity` - Consumer of finished count tables, if any.
///
/// # Returns
/// RunSummary
pub async fn run<J, T, I>(
    config: Arc<RunConfig>,
    samples: Vec<Sample>,
    joiner: &J,
    translator: &T,
    identity: Option<&I>,
) -> Result<RunSummary, PipelineError>
where
    J: ReadJoiner,
    T: Translator,
    I: IdentityStage,
{
    let layout = &config.layout;
    layout.create()?;

    let lane_count: usize = samples.iter().map(|s| s.lanes.len()).sum();
    progress(0, &format!("Found {} samples across {} lanes", samples.len(), lane_count));

    let mut run_log = RunLog::new(layout.translate);
    record_parameters(&config, &mut run_log);

    // Lanes
    progress(10, &format!("Joining {} lanes", lane_count));
    let mut lane_futures = Vec::with_capacity(lane_count);
    for (sample_idx, sample) in samples.iter().enumerate() {
        for lane in &sample.lanes {
            lane_futures.push(join_lane(&config, joiner, sample_idx, sample, lane));
        }
    }
    let lane_results = try_join_all(lane_futures).await?;

    let mut failed_lanes = 0;
    for result in &lane_results {
        if result.fastq.is_none() {
            failed_lanes += 1;
        }
        run_log.note(result.diagnostic.clone());
    }

    // Samples
    progress(40, "Aggregating lanes and counting unique sequences");
    let mut sample_futures = Vec::with_capacity(samples.len());
    for (sample_idx, sample) in samples.iter().enumerate() {
        let lanes: Vec<&LaneResult> = lane_results.iter().filter(|r| r.sample_idx == sample_idx).collect();
        sample_futures.push(process_sample(&config, translator, sample, lanes));
    }
    let reports = try_join_all(sample_futures).await?;

    let mut inconsistencies = 0;
    let mut nt_tables = Vec::with_capacity(reports.len());
    let mut aa_tables = Vec::new();
    for (idx, report) in reports.into_iter().enumerate() {
        inconsistencies += report.inconsistencies;
        nt_tables.push(report.nt_counts);
        aa_tables.extend(report.aa_counts);
        for line in report.diagnostics {
            run_log.note(line);
        }
        run_log.push_row(idx, report.row);
    }

    layout.finalize_lanes()?;

    let mut handoff_failures = 0;
    if let Some(stage) = identity {
        progress(80, "Handing count tables to the identity stage");
        nt_tables.sort();
        aa_tables.sort();
        nt_tables.append(&mut aa_tables);
        handoff_failures = hand_off(&nt_tables, stage, &mut run_log).await?;
    }

    progress(90, "Writing recovery log");
    let log_path = layout.log_path();
    run_log.write(&log_path)?;

    progress(100, &format!("Finished {} samples", samples.len()));
    Ok(RunSummary {
        samples: samples.len(),
        lanes: lane_count,
        failed_lanes,
        inconsistencies,
        handoff_failures,
        rows: run_log.rows().cloned().collect(),
        log_path,
    })
}


fn record_parameters(config: &RunConfig, run_log: &mut RunLog) {
    let args = &config.args;
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    run_log.note(format!("input directory: {}", config.input_dir.display()));
    run_log.note(format!("output directory: {}", config.layout.root.display()));
    run_log.note(format!("threads: {}", args.threads));
    match args.primers() {
        Some((forward, reverse)) => run_log.note(format!("primers: {} / {}", forward, reverse)),
        None => run_log.note("primers: none"),
    }
    if let Some(extra) = &args.extra_flags {
        run_log.note(format!("extra join flags: {}", extra));
    }
    run_log.note(format!("translate: {}", yes_no(config.layout.translate)));
    run_log.note(format!("retain lanes: {}", yes_no(config.layout.retain_lanes)));
}


/// Joins one lane and projects the joined reads to FASTA.
///
/// A failed or empty join is not an error; the lane contributes zero reads.
/// Unreadable inputs or a joiner that cannot be started are fatal.
async fn join_lane<J: ReadJoiner>(
    config: &RunConfig,
    joiner: &J,
    sample_idx: usize,
    sample: &Sample,
    lane: &Lane,
) -> Result<LaneResult, PipelineError> {
    let _permit = config
        .lane_semaphore
        .acquire()
        .await
        .map_err(|e| PipelineError::Other(anyhow!(e)))?;

    for input in [&lane.r1, &lane.r2] {
        File::open(input).map_err(|e| PipelineError::Join {
            lane: lane.name.clone(),
            error: format!("cannot open {}: {}", input.display(), e),
        })?;
    }

    let layout = &config.layout;
    fs::create_dir_all(layout.lane_dir(&lane.name))?;
    let fastq_path = layout.path(&ArtifactDescriptor::lane(&sample.name, &lane.name, Stage::LaneJoined))?;
    let fasta_path = layout.path(&ArtifactDescriptor::lane(&sample.name, &lane.name, Stage::LaneFasta))?;
    let join_log = layout.path(&ArtifactDescriptor::lane(&sample.name, &lane.name, Stage::LaneJoinLog))?;

    let joined = PartialOutput::new(fastq_path.clone());
    let request = LaneJoinRequest {
        lane,
        out_fastq: &fastq_path,
        log: &join_log,
    };
    debug!("Joining lane {}", lane.name);
    let outcome = joiner.join(&request).await.map_err(|e| PipelineError::Join {
        lane: lane.name.clone(),
        error: e.to_string(),
    })?;

    if !outcome.success || !joined.path().exists() {
        let reason = if outcome.success {
            format!("{} exited 0 but wrote no output", PANDASEQ_TAG)
        } else {
            outcome.failure_reason()
        };
        warn!("Join failed for lane {}: {}", lane.name, reason);
        return Ok(LaneResult {
            sample_idx,
            fastq: None,
            fasta: None,
            diagnostic: format!("{}: join failed ({}); 0 joined reads", lane.name, reason),
        });
    }
    let fastq_path = joined.commit();

    let (src, dst) = (fastq_path.clone(), fasta_path.clone());
    let records = task::spawn_blocking(move || fastq_to_fasta(&src, &dst))
        .await
        .map_err(blocking_failed)??;

    info!("Lane {}: {} joined reads", lane.name, records);
    Ok(LaneResult {
        sample_idx,
        fastq: Some(fastq_path),
        fasta: Some(fasta_path),
        diagnostic: format!("{}: {} joined reads", lane.name, records),
    })
}


/// Merges a sample's lanes, counts it, optionally translates it, and builds
/// its recovery row once every table is final.
async fn process_sample<T: Translator>(
    config: &RunConfig,
    translator: &T,
    sample: &Sample,
    lanes: Vec<&LaneResult>,
) -> Result<SampleReport, PipelineError> {
    let layout = &config.layout;
    let mut diagnostics = Vec::new();
    let mut inconsistencies = 0;

    let lane_fastqs: Vec<PathBuf> = lanes.iter().filter_map(|l| l.fastq.clone()).collect();
    let lane_fastas: Vec<PathBuf> = lanes.iter().filter_map(|l| l.fasta.clone()).collect();
    let sample_fastq = layout.path(&ArtifactDescriptor::sample(&sample.name, Alphabet::Nucleotide, Stage::SampleJoined))?;
    let sample_fasta = layout.path(&ArtifactDescriptor::sample(&sample.name, Alphabet::Nucleotide, Stage::SampleFasta))?;

    {
        let (fastqs, fastas) = (lane_fastqs.clone(), lane_fastas.clone());
        let (fastq_out, fasta_out) = (sample_fastq.clone(), sample_fasta.clone());
        task::spawn_blocking(move || -> std::io::Result<()> {
            concatenate(&fastqs, &fastq_out)?;
            concatenate(&fastas, &fasta_out)?;
            Ok(())
        })
        .await
        .map_err(blocking_failed)??;
    }

    // Merged files are persisted, so lane copies can go.
    if !layout.retain_lanes {
        for path in lane_fastqs.iter().chain(lane_fastas.iter()) {
            remove_if_exists(path)?;
        }
    }

    let nt_table = {
        let fasta = sample_fasta.clone();
        task::spawn_blocking(move || CountTable::from_fasta(&fasta))
            .await
            .map_err(blocking_failed)??
    };
    if let Some(err) = publish_table(layout, &sample.name, Alphabet::Nucleotide, nt_table, None).await? {
        warn!("{}", err);
        diagnostics.push(err.to_string());
        inconsistencies += 1;
    }
    let nt_counts = layout.path(&ArtifactDescriptor::sample(&sample.name, Alphabet::Nucleotide, Stage::Counts))?;

    let aa_counts = if layout.translate {
        let (aa_path, inconsistency) = translate_sample(config, translator, &sample.name, &nt_counts).await?;
        if let Some(err) = inconsistency {
            warn!("{}", err);
            diagnostics.push(err.to_string());
            inconsistencies += 1;
        }
        Some(aa_path)
    } else {
        None
    };

    let r1: Vec<PathBuf> = sample.lanes.iter().map(|l| l.r1.clone()).collect();
    let r2: Vec<PathBuf> = sample.lanes.iter().map(|l| l.r2.clone()).collect();
    let name = sample.name.clone();
    let (nt_src, aa_src) = (nt_counts.clone(), aa_counts.clone());
    let row = task::spawn_blocking(move || {
        recovery_row(&RecoverySources {
            sample: &name,
            r1: &r1,
            r2: &r2,
            nt_counts: &nt_src,
            aa_counts: aa_src.as_deref(),
        })
    })
    .await
    .map_err(blocking_failed)??;

    debug!(
        "Sample {}: {} raw R1 reads, {} unique / {} total nucleotide sequences",
        row.sample, row.raw_r1, row.nt.unique, row.nt.total
    );
    Ok(SampleReport {
        row,
        nt_counts,
        aa_counts,
        diagnostics,
        inconsistencies,
    })
}


/// Writes a count table and its histogram, then checks the histogram's
/// reads against the total the written table declares and, for derived
/// tables, against the total declared by their source.
///
/// # Returns
/// A CountingInconsistency on the first disagreement; the histogram is
/// written regardless.
async fn publish_table(
    layout: &RunLayout,
    sample: &str,
    alphabet: Alphabet,
    table: CountTable,
    upstream_total: Option<u64>,
) -> Result<Option<PipelineError>, PipelineError> {
    let counts_path = layout.path(&ArtifactDescriptor::sample(sample, alphabet, Stage::Counts))?;
    let histo_path = layout.path(&ArtifactDescriptor::sample(sample, alphabet, Stage::Histogram))?;
    let sample = sample.to_string();

    task::spawn_blocking(move || -> Result<Option<PipelineError>, PipelineError> {
        table.write(&counts_path)?;
        let histogram = LengthHistogram::from_counts(&table);
        histogram.write(&histo_path)?;

        let (_, declared) = read_count_header(&counts_path).map_err(|e| PipelineError::MalformedTable {
            path: counts_path.clone(),
            error: e.to_string(),
        })?;
        let mismatch = histogram
            .check_against(declared)
            .and_then(|()| upstream_total.map_or(Ok(()), |total| histogram.check_against(total)));
        Ok(mismatch.err().map(|(histogram, declared)| {
            PipelineError::CountingInconsistency {
                sample: format!("{} ({})", sample, alphabet.tag()),
                histogram,
                declared,
            }
        }))
    })
    .await
    .map_err(blocking_failed)?
}


/// Translates a sample's nucleotide table and collapses synonymous rows.
///
/// The pre-merge table is removed on every exit path.
async fn translate_sample<T: Translator>(
    config: &RunConfig,
    translator: &T,
    sample: &str,
    nt_counts: &Path,
) -> Result<(PathBuf, Option<PipelineError>), PipelineError> {
    let layout = &config.layout;
    let pre_merge = PartialOutput::new(
        layout.path(&ArtifactDescriptor::sample(sample, Alphabet::AminoAcid, Stage::PreMergeCounts))?,
    );

    let outcome = translator
        .translate(nt_counts, pre_merge.path())
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: TRANSLATOR_TAG.to_string(),
            error: format!("{}: {}", sample, e),
        })?;
    if !outcome.success {
        return Err(PipelineError::ToolExecution {
            tool: TRANSLATOR_TAG.to_string(),
            error: format!("{}: {}", sample, outcome.failure_reason()),
        });
    }

    let source = pre_merge.path().to_path_buf();
    let (aa_table, declared_total) = task::spawn_blocking(move || {
        read_count_header(&source)
            .and_then(|(_, total)| Ok((CountTable::from_weighted(read_count_rows(&source)?), total)))
            .map_err(|e| PipelineError::MalformedTable {
                path: source.clone(),
                error: e.to_string(),
            })
    })
    .await
    .map_err(blocking_failed)??;
    drop(pre_merge);

    let inconsistency = publish_table(layout, sample, Alphabet::AminoAcid, aa_table, Some(declared_total)).await?;
    let aa_counts = layout.path(&ArtifactDescriptor::sample(sample, Alphabet::AminoAcid, Stage::Counts))?;
    Ok((aa_counts, inconsistency))
}


/// Offers this run's count tables to the identity stage in the given order.
/// A table is deleted only after the stage acknowledges it; unacknowledged
/// tables stay for a later replay. Files already in the count directories
/// from earlier runs are not offered.
///
/// # Returns
/// Number of tables left in place.
async fn hand_off<I: IdentityStage>(
    tables: &[PathBuf],
    stage: &I,
    run_log: &mut RunLog,
) -> Result<usize, PipelineError> {
    let mut failures = 0;
    for file in tables {
        let error = match stage.submit(file).await {
            Ok(outcome) if outcome.success => {
                fs::remove_file(file)?;
                debug!("{} acknowledged {}", IDENTITY_TAG, file.display());
                continue;
            }
            Ok(outcome) => outcome.failure_reason(),
            Err(e) => e.to_string(),
        };
        let err = PipelineError::Handoff { path: file.clone(), error };
        warn!("{}; kept for replay", err);
        run_log.note(format!("{}; kept for replay", err));
        failures += 1;
    }
    Ok(failures)
}
