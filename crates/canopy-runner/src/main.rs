//! `canopy` command-line entry point.
//!
//! ```text
//! canopy run --config batch.yaml [--workers 8] [--report report.json]
//! canopy tile LHD_0512_6520.laz --out products/
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use canopy_common::{CancelToken, TaskContext};
use canopy_runner::metrics::describe_metrics;
use canopy_runner::{
    BatchConfig, BatchError, BatchReport, ConfigError, Orchestrator, TileRef, TileStatus, TileTask,
};
use canopy_store::{FsStore, ObjectStore};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "canopy", version, about = "Terrain and canopy rasters from lidar tiles")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every tile under the configured input prefix.
    Run(RunArgs),
    /// Process one local tile into a directory.
    Tile(TileArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Batch configuration (YAML).
    #[arg(short, long)]
    config: PathBuf,

    /// Override the number of concurrent tasks.
    #[arg(long)]
    workers: Option<usize>,

    /// Override the input prefix.
    #[arg(long)]
    input_prefix: Option<String>,

    /// Override the output prefix.
    #[arg(long)]
    output_prefix: Option<String>,

    /// Override the per-task timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write the batch report here instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TileArgs {
    /// Path to a .las or .laz file.
    input: PathBuf,

    /// Directory receiving `<product>/<stem>.tif`.
    #[arg(short, long)]
    out: PathBuf,

    /// Optional batch configuration for pipeline and engine settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep the scratch tree after publishing.
    #[arg(long)]
    keep_scratch: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    describe_metrics();

    let result = match cli.command {
        Command::Run(args) => run_batch(args),
        Command::Tile(args) => run_tile(args),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!(error = %e, "canopy failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel `token` on Ctrl-C.
fn install_interrupt_handler(token: CancelToken) -> Result<(), BatchError> {
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, cancelling");
        token.cancel();
    })?;
    Ok(())
}

fn run_batch(args: RunArgs) -> Result<bool, BatchError> {
    let mut config = BatchConfig::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(prefix) = args.input_prefix {
        config.input_prefix = prefix;
    }
    if let Some(prefix) = args.output_prefix {
        config.output_prefix = prefix;
    }
    if let Some(secs) = args.timeout_secs {
        config.task_timeout_secs = Some(secs);
    }
    config.validate()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let config = Arc::new(config);
    let store = config.store.open()?;
    let orchestrator = Orchestrator::new(TileTask::new(config, store));
    install_interrupt_handler(orchestrator.cancel_token().clone())?;

    let report = orchestrator.run()?;
    write_report(&report, args.report.as_deref())?;
    Ok(report.is_success())
}

fn write_report(report: &BatchReport, path: Option<&Path>) -> Result<(), BatchError> {
    let json = report.to_json_pretty()?;
    match path {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_tile(args: TileArgs) -> Result<bool, BatchError> {
    let mut config = match &args.config {
        Some(path) => BatchConfig::load(path)?,
        None => BatchConfig::default(),
    };
    config.output_prefix = String::new();
    config.keep_scratch |= args.keep_scratch;
    config.validate()?;

    let file_name = args
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ConfigError::Invalid(format!("{} is not a file", args.input.display())))?;
    let tile = TileRef::from_key(file_name).ok_or_else(|| {
        ConfigError::Invalid(format!("{} is not a .las or .laz file", args.input.display()))
    })?;
    let input_dir = match args.input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let config = Arc::new(config);
    let input: Arc<dyn ObjectStore> = Arc::new(FsStore::new(&input_dir)?);
    let output: Arc<dyn ObjectStore> = Arc::new(FsStore::new(&args.out)?);
    let task = TileTask::new(Arc::clone(&config), input).with_output_store(output);

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone())?;
    let ctx = match config.task_timeout() {
        Some(timeout) => TaskContext::with_timeout(cancel, timeout),
        None => TaskContext::new(cancel, None),
    };

    let manifest = task.run(&tile, &ctx);
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(manifest.status != TileStatus::Failed)
}
