use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use manga_repack::config::{Config, ConfigLoader};
use manga_repack::error::RepackError;
use manga_repack::inspect;
use manga_repack::metadata::{AniListClient, BangumiClient, MetadataResolver, MetadataSource};
use manga_repack::output::JsonOutput;
use manga_repack::pipeline::{BatchCoordinator, PipelineConfig, discover_archives};
use manga_repack::progress::ProgressTracker;

#[derive(Parser)]
#[command(name = "manga-repack")]
#[command(about = "Normalizes manga archives into canonical CBZ containers")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Repack a directory or a single archive")]
    Process(ProcessArgs),
    #[command(about = "Report archive structure without modifying anything")]
    Inspect(InspectArgs),
    #[command(about = "Show or reset the persisted progress document")]
    Progress(ProgressArgs),
}

#[derive(Args)]
struct ProcessArgs {
    /// Source archive or directory of archives.
    input: PathBuf,

    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    temp: Option<PathBuf>,

    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Also maintain a minimal completed-set document at this path.
    #[arg(long)]
    simple_progress_file: Option<PathBuf>,

    /// Skip the metadata lookup entirely.
    #[arg(long)]
    no_metadata: bool,
}

#[derive(Args)]
struct InspectArgs {
    input: PathBuf,
}

#[derive(Args)]
struct ProgressArgs {
    #[arg(long)]
    progress_file: Option<PathBuf>,

    #[command(subcommand)]
    command: ProgressCommand,
}

#[derive(Subcommand)]
enum ProgressCommand {
    #[command(about = "Print statistics from the progress document")]
    Summary,
    #[command(about = "Delete the progress document")]
    Reset,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(repack) = report.downcast_ref::<RepackError>() {
            return ExitCode::from(map_exit_code(repack));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RepackError) -> u8 {
    match error {
        RepackError::InvalidInput(_) | RepackError::ConfigRead(_) | RepackError::ConfigParse(_) => {
            2
        }
        RepackError::MetadataHttp(_) | RepackError::MetadataStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Process(args) => run_process(args, &config),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Progress(args) => run_progress(args, &config),
    }
}

fn run_process(args: ProcessArgs, config: &Config) -> miette::Result<()> {
    let input = if args.input.exists() {
        args.input.clone()
    } else {
        return Err(miette::Report::from(RepackError::InvalidInput(args.input)));
    };

    let files = if input.is_dir() {
        discover_archives(&input).into_diagnostic()?
    } else {
        vec![input.clone()]
    };
    if files.is_empty() {
        return Err(miette::Report::msg(format!(
            "no archives found under {}",
            input.display()
        )));
    }

    let output_dir = args
        .output
        .or_else(|| config.paths.output.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| {
            if input.is_dir() {
                input.join("repacked")
            } else {
                input
                    .parent()
                    .map(|parent| parent.join("repacked"))
                    .unwrap_or_else(|| PathBuf::from("repacked"))
            }
        });
    let temp_dir = args
        .temp
        .or_else(|| config.paths.temp.as_ref().map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir);
    let progress_path = resolve_progress_path(args.progress_file, &output_dir)?;
    let completed_set_path = args
        .simple_progress_file
        .map(|path| {
            Utf8PathBuf::from_path_buf(path)
                .map_err(|path| miette::Report::msg(format!("non-utf8 path: {}", path.display())))
        })
        .transpose()?;

    let resolver = if args.no_metadata || !config.metadata.enabled {
        None
    } else {
        let timeout = Duration::from_secs(config.metadata.timeout_secs);
        let delay = Duration::from_millis(config.metadata.rate_limit_ms);
        let sources: Vec<Box<dyn MetadataSource>> = vec![
            Box::new(BangumiClient::new(timeout, delay).into_diagnostic()?),
            Box::new(AniListClient::new(timeout, delay).into_diagnostic()?),
        ];
        Some(MetadataResolver::new(sources))
    };

    let pipeline_config = PipelineConfig {
        output_dir,
        temp_dir,
        progress_path,
        completed_set_path,
        save_interval: config.processing.save_interval,
        max_retries: config.processing.max_retries,
    };
    let cancel = Arc::new(AtomicBool::new(false));
    let coordinator =
        BatchCoordinator::new(pipeline_config, resolver, cancel).into_diagnostic()?;

    let report = coordinator.run(&files, &JsonOutput).into_diagnostic()?;
    JsonOutput::print_run(&report).into_diagnostic()?;
    Ok(())
}

fn run_inspect(args: InspectArgs) -> miette::Result<()> {
    let reports = if args.input.is_dir() {
        discover_archives(&args.input)
            .into_diagnostic()?
            .iter()
            .map(|path| inspect::inspect_report(path))
            .collect()
    } else if args.input.is_file() {
        vec![inspect::inspect_report(&args.input)]
    } else {
        return Err(miette::Report::from(RepackError::InvalidInput(args.input)));
    };

    JsonOutput::print_inspections(&reports).into_diagnostic()?;
    Ok(())
}

fn run_progress(args: ProgressArgs, config: &Config) -> miette::Result<()> {
    let default_dir = config
        .paths
        .output
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let path = resolve_progress_path(args.progress_file, &default_dir)?;

    match args.command {
        ProgressCommand::Summary => {
            let tracker = ProgressTracker::open(path).into_diagnostic()?;
            JsonOutput::print_statistics(tracker.statistics()).into_diagnostic()?;
            Ok(())
        }
        ProgressCommand::Reset => {
            if path.as_std_path().exists() {
                std::fs::remove_file(path.as_std_path()).into_diagnostic()?;
            }
            Ok(())
        }
    }
}

fn resolve_progress_path(
    explicit: Option<PathBuf>,
    default_dir: &std::path::Path,
) -> miette::Result<Utf8PathBuf> {
    let path = explicit.unwrap_or_else(|| default_dir.join("repack_progress.json"));
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| miette::Report::msg(format!("non-utf8 path: {}", path.display())))
}
