use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use env_logger::Builder;
use log::{self, LevelFilter, debug, error, info, warn};
use tokio::sync::Semaphore;

use derep_pipelines::cli::{parse, Arguments};
use derep_pipelines::config::defs::{PipelineError, RunConfig, DEFAULT_OUT_DIR};
use derep_pipelines::pipelines::adapters::{ExternalIdentityStage, ExternalTranslator, PandaseqJoiner};
use derep_pipelines::pipelines::dereplicate;
use derep_pipelines::utils::discovery::{discover_samples, Sample};
use derep_pipelines::utils::layout::{resolve_out_dir, RunLayout};
use derep_pipelines::utils::system::{detect_cores, lane_workers};


/// Everything validated before the output directory is touched.
struct Prepared {
    config: Arc<RunConfig>,
    samples: Vec<Sample>,
    joiner: PandaseqJoiner,
    translator: ExternalTranslator,
    identity: Option<ExternalIdentityStage>,
}


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n derep-pipelines\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let prepared = match prepare(args, dir) {
        Ok(prepared) => prepared,
        Err(e) => {
            if e.is_usage_error() {
                print_usage_error(&e);
            } else {
                error!("Setup failed: {}", e);
            }
            std::process::exit(e.exit_code());
        }
    };
    prepared.joiner.log_version().await;

    let Prepared { config, samples, joiner, translator, identity } = prepared;
    let outcome = tokio::select! {
        result = dereplicate::run(config.clone(), samples, &joiner, &translator, identity.as_ref()) => result,
        _ = tokio::signal::ctrl_c() => Err(PipelineError::Cancelled),
    };

    match outcome {
        Ok(summary) => {
            if summary.failed_lanes > 0 {
                warn!("{} of {} lanes failed to join; see {}", summary.failed_lanes, summary.lanes, summary.log_path.display());
            }
            if summary.inconsistencies > 0 {
                warn!("{} counting inconsistencies recorded in {}", summary.inconsistencies, summary.log_path.display());
            }
            if summary.handoff_failures > 0 {
                warn!("{} count tables were not acknowledged and remain for replay", summary.handoff_failures);
            }
            info!("Outputs written to {}", config.layout.root.display());
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(e.exit_code());
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Validates the input directory, discovers samples and checks every
/// external tool the run will call.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
///
/// # Returns
/// Prepared run; no files have been created yet.
fn prepare(args: Arguments, cwd: PathBuf) -> Result<Prepared, PipelineError> {
    let input_dir = absolute(&cwd, Path::new(&args.input_dir));
    let samples = discover_samples(&input_dir)?;
    let lane_count: usize = samples.iter().map(|s| s.lanes.len()).sum();
    info!("Discovered {} samples and {} lanes in {}", samples.len(), lane_count, input_dir.display());

    let tool_timeout = Duration::from_secs(args.tool_timeout_secs);

    let joiner = PandaseqJoiner::from_args(&args, tool_timeout);
    joiner.check()?;

    let translator = ExternalTranslator::from_args(&args, tool_timeout)?;
    if args.translate {
        translator.check()?;
    }

    let identity = ExternalIdentityStage::from_args(&args, tool_timeout)?;
    if let Some(stage) = &identity {
        stage.check()?;
    }

    let cores = detect_cores();
    let workers = lane_workers(args.threads, cores);
    debug!("Detected {} physical cores; joining up to {} lanes at once", cores, workers);

    let out_dir = resolve_out_dir(&input_dir, args.out_dir.as_deref(), DEFAULT_OUT_DIR);
    let layout = RunLayout::new(out_dir, args.translate, args.retain_lanes);

    let config = Arc::new(RunConfig {
        input_dir,
        layout,
        args,
        lane_semaphore: Arc::new(Semaphore::new(workers)),
    });

    Ok(Prepared {
        config,
        samples,
        joiner,
        translator,
        identity,
    })
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn print_usage_error(e: &PipelineError) {
    eprintln!("\n************************************************************");
    eprintln!("  ERROR: {}", e);
    eprintln!("************************************************************\n");
    eprintln!("Usage: derep-pipelines -i <input dir> [-o <output dir>] [-p <forward primer>] [-q <reverse primer>]");
    eprintln!("                       [-T <threads>] [-r] [-a] [-e \"<join flags>\"]");
    eprintln!("Run with --help for every option.");
}
