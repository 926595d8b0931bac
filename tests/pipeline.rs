use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tempfile::tempdir;
use tokio::sync::Semaphore;

use derep_pipelines::cli::Arguments;
use derep_pipelines::config::defs::{PipelineError, RunConfig, DEFAULT_OUT_DIR};
use derep_pipelines::pipelines::adapters::{IdentityStage, LaneJoinRequest, ReadJoiner, Translator};
use derep_pipelines::pipelines::dereplicate::{run, RunSummary};
use derep_pipelines::utils::command::ToolOutcome;
use derep_pipelines::utils::counts::{read_count_rows, CountTable};
use derep_pipelines::utils::discovery::discover_samples;
use derep_pipelines::utils::layout::{resolve_out_dir, RunLayout};


fn ok_outcome() -> ToolOutcome {
    ToolOutcome {
        exit_code: Some(0),
        success: true,
        ..ToolOutcome::default()
    }
}

fn failed_outcome(reason: &str) -> ToolOutcome {
    ToolOutcome {
        exit_code: Some(1),
        stderr: vec![reason.to_string()],
        ..ToolOutcome::default()
    }
}

/// Writes the joined reads configured for each lane.
#[derive(Default)]
struct MockJoiner {
    joined: HashMap<String, Vec<&'static str>>,
    failing: Vec<String>,
    hang: bool,
}

impl MockJoiner {
    fn lane(mut self, lane: &str, reads: &[&'static str]) -> Self {
        self.joined.insert(lane.to_string(), reads.to_vec());
        self
    }
}

impl ReadJoiner for MockJoiner {
    async fn join(&self, request: &LaneJoinRequest<'_>) -> Result<ToolOutcome> {
        let name = &request.lane.name;
        if self.failing.contains(name) {
            fs::write(request.out_fastq, "@partial\n")?;
            return Ok(failed_outcome("no overlap found"));
        }
        let mut text = String::new();
        for (i, seq) in self.joined.get(name).cloned().unwrap_or_default().iter().enumerate() {
            text.push_str(&format!("@{}:{}\n{}\n+\n{}\n", name, i, seq, "I".repeat(seq.len())));
        }
        fs::write(request.out_fastq, text)?;
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(ok_outcome())
    }
}

/// Maps nucleotide rows through a fixed table and writes un-merged rows
/// under a header declaring their own totals, or `declared_total` if set.
#[derive(Default)]
struct MockTranslator {
    table: HashMap<&'static str, &'static str>,
    declared_total: Option<u64>,
}

impl Translator for MockTranslator {
    async fn translate(&self, counts_file: &Path, pre_merge: &Path) -> Result<ToolOutcome> {
        let mut rows = String::new();
        let (mut unique, mut total) = (0, 0);
        for (seq, count) in read_count_rows(counts_file)? {
            if let Some(aa) = self.table.get(std::str::from_utf8(&seq)?) {
                rows.push_str(&format!("{}    {}    0.000%\n", aa, count));
                unique += 1;
                total += count;
            }
        }
        let text = format!(
            "number of unique sequences = {}\ntotal number of molecules = {}\n\n{}",
            unique,
            self.declared_total.unwrap_or(total),
            rows
        );
        fs::write(pre_merge, text)?;
        Ok(ok_outcome())
    }
}

/// Records every submission; rejects file names listed in `reject`.
#[derive(Default)]
struct MockIdentity {
    seen: Mutex<Vec<PathBuf>>,
    reject: Vec<&'static str>,
}

impl IdentityStage for MockIdentity {
    async fn submit(&self, counts_file: &Path) -> Result<ToolOutcome> {
        self.seen.lock().unwrap().push(counts_file.to_path_buf());
        let name = counts_file.file_name().unwrap().to_string_lossy().to_string();
        if self.reject.contains(&name.as_str()) {
            return Ok(failed_outcome("database locked"));
        }
        Ok(ok_outcome())
    }
}


fn write_raw(dir: &Path, lane: &str, reads: usize) {
    let mut text = String::new();
    for i in 0..reads {
        text.push_str(&format!("@r{}\nACGT\n+\nIIII\n", i));
    }
    fs::write(dir.join(format!("{}_R1_001.fastq", lane)), &text).unwrap();
    fs::write(dir.join(format!("{}_R2_001.fastq", lane)), &text).unwrap();
}

fn run_config(input: &Path, flags: &[&str]) -> Arc<RunConfig> {
    let mut argv = vec!["derep-pipelines".to_string(), "-i".to_string(), input.display().to_string()];
    argv.extend(flags.iter().map(|f| f.to_string()));
    let args = Arguments::parse_from(argv);
    let root = resolve_out_dir(input, args.out_dir.as_deref(), DEFAULT_OUT_DIR);
    Arc::new(RunConfig {
        input_dir: input.to_path_buf(),
        layout: RunLayout::new(root, args.translate, args.retain_lanes),
        lane_semaphore: Arc::new(Semaphore::new(args.threads as usize)),
        args,
    })
}

async fn run_with(
    config: Arc<RunConfig>,
    joiner: &MockJoiner,
    translator: &MockTranslator,
    identity: Option<&MockIdentity>,
) -> Result<RunSummary, PipelineError> {
    let samples = discover_samples(&config.input_dir)?;
    run(config, samples, joiner, translator, identity).await
}

fn log_table(root: &Path) -> Vec<String> {
    let text = fs::read_to_string(root.join("log.txt")).unwrap();
    let table = text.split("\n\n").last().unwrap();
    table.lines().map(str::to_string).collect()
}


#[tokio::test]
async fn test_two_lanes_merge_into_one_table() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 4);
    write_raw(dir.path(), "S1_S1_L002", 3);

    let joiner = MockJoiner::default()
        .lane("S1_S1_L001", &["ACGT", "ACGT", "ACGT"])
        .lane("S1_S1_L002", &["ACGT", "ACGG", "ACGT"]);
    let config = run_config(dir.path(), &["-T", "2"]);
    let root = config.layout.root.clone();

    let summary = run_with(config, &joiner, &MockTranslator::default(), None).await?;
    assert_eq!(summary.samples, 1);
    assert_eq!(summary.lanes, 2);
    assert_eq!(summary.failed_lanes, 0);

    let counts = fs::read_to_string(root.join("counts/S1_S1_counts.txt"))?;
    assert_eq!(
        counts,
        "number of unique sequences = 2\ntotal number of molecules = 6\n\nACGT 5 83.333%\nACGG 1 16.667%\n"
    );

    let histo = fs::read_to_string(root.join("histos/S1_S1_histo.txt"))?;
    assert!(histo.starts_with("#Reads: 6\nMin: 4\nMax: 4\n#Read Length Histogram:\nLen  Reads  %Reads\n"));
    assert!(histo.ends_with("4  6  100.000%\n"));

    let fasta = fs::read_to_string(root.join("fastas/S1_S1.joined.fasta"))?;
    assert_eq!(fasta.lines().filter(|l| l.starts_with('>')).count(), 6);
    assert!(root.join("fastqs/S1_S1.joined.fastq").is_file());

    let table = log_table(&root);
    assert_eq!(table[0], "sample\tfastq_R1\tfastq_R2\tunique_nt\ttotal_nt\trecovered_nt(%)");
    assert_eq!(table[1], "S1_S1\t7\t7\t2\t6\t85.71%");
    Ok(())
}

#[tokio::test]
async fn test_without_translation_layout() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 2);
    let joiner = MockJoiner::default().lane("S1_S1_L001", &["ACGT", "TTTT"]);
    let config = run_config(dir.path(), &[]);
    let root = config.layout.root.clone();

    run_with(config, &joiner, &MockTranslator::default(), None).await?;

    assert!(!root.join("counts_aa").exists());
    assert!(!root.join("individual.lanes").exists());
    for sub in ["counts", "fastas", "fastqs", "histos"] {
        assert!(root.join(sub).is_dir(), "{} missing", sub);
    }
    let table = log_table(&root);
    assert!(!table[0].contains("aa"));
    assert_eq!(table[1].split('\t').count(), 6);
    Ok(())
}

#[tokio::test]
async fn test_empty_and_failed_lanes_do_not_stop_the_run() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "A_S1_L001", 5);
    write_raw(dir.path(), "B_S2_L001", 5);
    write_raw(dir.path(), "C_S3_L001", 2);

    let mut joiner = MockJoiner::default()
        .lane("A_S1_L001", &[])
        .lane("C_S3_L001", &["GGCC", "GGCC"]);
    joiner.failing.push("B_S2_L001".to_string());

    let config = run_config(dir.path(), &["-r"]);
    let root = config.layout.root.clone();
    let summary = run_with(config, &joiner, &MockTranslator::default(), None).await?;
    assert_eq!(summary.failed_lanes, 1);

    for sample in ["A_S1", "B_S2"] {
        let counts = fs::read_to_string(root.join(format!("counts/{}_counts.txt", sample)))?;
        assert_eq!(counts, "number of unique sequences = 0\ntotal number of molecules = 0\n\n");
        let histo = fs::read_to_string(root.join(format!("histos/{}_histo.txt", sample)))?;
        assert!(histo.starts_with("#Reads: 0\nMin: 0\nMax: 0\n"));
    }

    let table = log_table(&root);
    assert_eq!(table[1], "A_S1\t5\t5\t0\t0\t0.00%");
    assert_eq!(table[2], "B_S2\t5\t5\t0\t0\t0.00%");
    assert_eq!(table[3], "C_S3\t2\t2\t1\t2\t100.00%");

    let log = fs::read_to_string(root.join("log.txt"))?;
    assert!(log.contains("B_S2_L001: join failed (exit 1: no overlap found); 0 joined reads"));
    assert!(log.contains("A_S1_L001: 0 joined reads"));

    // Retained lanes stay on disk; the failed lane leaves no partial output.
    assert!(root.join("individual.lanes/C_S3_L001/C_S3_L001.joined.fasta").is_file());
    assert!(!root.join("individual.lanes/B_S2_L001/B_S2_L001.joined.fastq").exists());
    Ok(())
}

#[tokio::test]
async fn test_amino_acid_rows_sum_their_sources() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 10);
    let joiner = MockJoiner::default().lane(
        "S1_S1_L001",
        &["AAA", "AAA", "AAA", "AAG", "AAG", "GGG", "GGG", "GGG", "GGG"],
    );
    let translator = MockTranslator {
        table: HashMap::from([("AAA", "K"), ("AAG", "K"), ("GGG", "G")]),
        ..MockTranslator::default()
    };
    let config = run_config(dir.path(), &["-a"]);
    let root = config.layout.root.clone();

    run_with(config, &joiner, &translator, None).await?;

    let nt = CountTable::read(&root.join("counts/S1_S1_counts.txt"))?;
    let aa = CountTable::read(&root.join("counts_aa/S1_S1_counts.aa.txt"))?;
    assert_eq!(aa.unique(), 2);
    assert_eq!(aa.total(), nt.total());
    for entry in aa.entries() {
        let expected: u64 = nt
            .entries()
            .iter()
            .filter(|n| {
                let nt = String::from_utf8_lossy(&n.sequence);
                translator.table.get(nt.as_ref()).map(|aa| aa.as_bytes()) == Some(entry.sequence.as_slice())
            })
            .map(|n| n.count)
            .sum();
        assert_eq!(entry.count, expected, "{}", String::from_utf8_lossy(&entry.sequence));
    }

    let text = fs::read_to_string(root.join("counts_aa/S1_S1_counts.aa.txt"))?;
    assert!(text.ends_with("\nK 5 55.556%\nG 4 44.444%\n"));
    assert!(!root.join("counts_aa/S1_S1_counts.aa.dup.txt").exists());
    assert!(root.join("histos/S1_S1_histo.aa.txt").is_file());

    let table = log_table(&root);
    assert!(table[0].ends_with("recovered_nt(%)\tunique_aa\ttotal_aa\trecovered_aa(%)"));
    assert_eq!(table[1], "S1_S1\t10\t10\t3\t9\t90.00%\t2\t9\t90.00%");
    Ok(())
}

#[tokio::test]
async fn test_log_total_matches_count_table() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "x_S1_L001", 3);
    write_raw(dir.path(), "y_S2_L001", 3);
    let joiner = MockJoiner::default()
        .lane("x_S1_L001", &["ACGTA", "ACG"])
        .lane("y_S2_L001", &["TT", "TT", "TTT"]);
    let config = run_config(dir.path(), &["-T", "4"]);
    let root = config.layout.root.clone();

    let summary = run_with(config, &joiner, &MockTranslator::default(), None).await?;
    assert_eq!(summary.rows.iter().map(|r| r.sample.as_str()).collect::<Vec<_>>(), vec!["x_S1", "y_S2"]);
    for row in &summary.rows {
        let table = CountTable::read(&root.join(format!("counts/{}_counts.txt", row.sample)))?;
        let sum: u64 = table.entries().iter().map(|e| e.count).sum();
        assert_eq!(row.nt.total, sum);
    }
    Ok(())
}

#[tokio::test]
async fn test_handoff_deletes_only_acknowledged_tables() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 1);
    write_raw(dir.path(), "S2_S2_L001", 1);
    let joiner = MockJoiner::default()
        .lane("S1_S1_L001", &["ACGT"])
        .lane("S2_S2_L001", &["ACGT"]);
    let translator = MockTranslator {
        table: HashMap::from([("ACGT", "T")]),
        ..MockTranslator::default()
    };
    let identity = MockIdentity {
        reject: vec!["S2_S2_counts.txt"],
        ..MockIdentity::default()
    };
    let config = run_config(dir.path(), &["-a"]);
    let root = config.layout.root.clone();

    let summary = run_with(config, &joiner, &translator, Some(&identity)).await?;
    assert_eq!(summary.handoff_failures, 1);

    let seen: Vec<String> = identity
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.strip_prefix(&root).unwrap().display().to_string())
        .collect();
    assert_eq!(
        seen,
        vec![
            "counts/S1_S1_counts.txt",
            "counts/S2_S2_counts.txt",
            "counts_aa/S1_S1_counts.aa.txt",
            "counts_aa/S2_S2_counts.aa.txt",
        ]
    );

    assert!(!root.join("counts/S1_S1_counts.txt").exists());
    assert!(root.join("counts/S2_S2_counts.txt").exists());
    assert!(!root.join("counts_aa/S2_S2_counts.aa.txt").exists());

    // Rows were taken before handoff.
    assert_eq!(summary.rows[1].nt.total, 1);
    let log = fs::read_to_string(root.join("log.txt"))?;
    assert!(log.contains("S2_S2_counts.txt failed: exit 1: database locked; kept for replay"));
    Ok(())
}

#[tokio::test]
async fn test_unreadable_lane_input_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 1);
    fs::remove_file(dir.path().join("S1_S1_L001_R2_001.fastq"))?;
    let config = run_config(dir.path(), &[]);

    let result = run_with(config, &MockJoiner::default(), &MockTranslator::default(), None).await;
    assert!(matches!(result, Err(PipelineError::Join { .. })));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_join_leaves_no_partial_output() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 1);
    let mut joiner = MockJoiner::default().lane("S1_S1_L001", &["ACGT"]);
    joiner.hang = true;
    let config = run_config(dir.path(), &["-r"]);
    let root = config.layout.root.clone();

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        run_with(config, &joiner, &MockTranslator::default(), None),
    )
    .await;
    assert!(result.is_err());
    assert!(!root.join("individual.lanes/S1_S1_L001/S1_S1_L001.joined.fastq").exists());
    assert!(!root.join("log.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_counting_is_repeatable() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 2);
    write_raw(dir.path(), "S1_S1_L002", 2);
    let joiner = MockJoiner::default()
        .lane("S1_S1_L001", &["CC", "AA", "GG"])
        .lane("S1_S1_L002", &["GG", "AA", "TTT"]);

    let first = run_config(dir.path(), &["-o", "first"]);
    let second = run_config(dir.path(), &["-o", "second", "-T", "2"]);
    let (a, b) = (first.layout.root.clone(), second.layout.root.clone());
    run_with(first, &joiner, &MockTranslator::default(), None).await?;
    run_with(second, &joiner, &MockTranslator::default(), None).await?;

    for file in ["counts/S1_S1_counts.txt", "histos/S1_S1_histo.txt"] {
        assert_eq!(fs::read(a.join(file))?, fs::read(b.join(file))?);
    }
    let counts = fs::read_to_string(a.join("counts/S1_S1_counts.txt"))?;
    assert!(counts.ends_with("AA 2 33.333%\nGG 2 33.333%\nCC 1 16.667%\nTTT 1 16.667%\n"));
    Ok(())
}

#[tokio::test]
async fn test_sample_numbers_keep_samples_apart() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "x_S1_L001", 2);
    write_raw(dir.path(), "x_S2_L001", 3);
    let joiner = MockJoiner::default()
        .lane("x_S1_L001", &["ACGT", "ACGT"])
        .lane("x_S2_L001", &["TTTT", "GG", "GG"]);
    let config = run_config(dir.path(), &[]);
    let root = config.layout.root.clone();

    let summary = run_with(config, &joiner, &MockTranslator::default(), None).await?;
    assert_eq!(summary.samples, 2);

    let first = fs::read_to_string(root.join("counts/x_S1_counts.txt"))?;
    assert!(first.ends_with("\n\nACGT 2 100.000%\n"));
    let second = fs::read_to_string(root.join("counts/x_S2_counts.txt"))?;
    assert!(second.ends_with("\n\nGG 2 66.667%\nTTTT 1 33.333%\n"));

    let table = log_table(&root);
    assert_eq!(table[1], "x_S1\t2\t2\t1\t2\t100.00%");
    assert_eq!(table[2], "x_S2\t3\t3\t2\t3\t100.00%");
    Ok(())
}

#[tokio::test]
async fn test_translated_total_mismatch_is_logged() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 9);
    let joiner = MockJoiner::default().lane(
        "S1_S1_L001",
        &["AAA", "AAA", "AAA", "AAG", "AAG", "GGG", "GGG", "GGG", "GGG"],
    );
    let translator = MockTranslator {
        table: HashMap::from([("AAA", "K"), ("AAG", "K"), ("GGG", "G")]),
        declared_total: Some(10),
    };
    let config = run_config(dir.path(), &["-a"]);
    let root = config.layout.root.clone();

    let summary = run_with(config, &joiner, &translator, None).await?;
    assert_eq!(summary.inconsistencies, 1);

    // The tables and histogram are still written.
    let aa = CountTable::read(&root.join("counts_aa/S1_S1_counts.aa.txt"))?;
    assert_eq!(aa.total(), 9);
    assert!(root.join("histos/S1_S1_histo.aa.txt").is_file());

    let log = fs::read_to_string(root.join("log.txt"))?;
    assert!(log.contains("Counting inconsistency for S1_S1 (aa): histogram holds 9 reads, count table declares 10"));
    assert!(!log.contains("S1_S1 (nt)"));
    Ok(())
}

#[tokio::test]
async fn test_handoff_skips_tables_from_earlier_runs() -> Result<()> {
    let dir = tempdir()?;
    write_raw(dir.path(), "S1_S1_L001", 1);
    let joiner = MockJoiner::default().lane("S1_S1_L001", &["ACGT"]);
    let identity = MockIdentity::default();
    let config = run_config(dir.path(), &[]);
    let root = config.layout.root.clone();

    let stale = root.join("counts/old_S9_counts.txt");
    fs::create_dir_all(root.join("counts"))?;
    fs::write(&stale, "number of unique sequences = 0\ntotal number of molecules = 0\n\n")?;

    let summary = run_with(config, &joiner, &MockTranslator::default(), Some(&identity)).await?;
    assert_eq!(summary.handoff_failures, 0);

    let seen = identity.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![root.join("counts/S1_S1_counts.txt")]);
    assert!(stale.exists());
    assert!(!root.join("counts/S1_S1_counts.txt").exists());
    Ok(())
}
