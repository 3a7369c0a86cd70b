use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_biodata_graph::app::{Pipeline, ProgressSink, RunOptions};
use kira_biodata_graph::config::{ConfigLoader, RunConfig};
use kira_biodata_graph::domain::{EdgePolicy, RunMode};
use kira_biodata_graph::error::KiraError;
use kira_biodata_graph::fetch::HttpFetcher;
use kira_biodata_graph::graphdb::{GraphStore, MemoryGraphStore, Neo4jHttpStore};
use kira_biodata_graph::output::{JsonOutput, OutputMode, TextOutput};

const EXIT_PARTIAL_FAILURE: u8 = 4;

#[derive(Parser)]
#[command(name = "kira-bg")]
#[command(about = "Load GO, Reactome, GTEx and NCBI Taxonomy into a Neo4j property graph")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Refresh sources, parse them and load the graph")]
    Run(RunArgs),
    #[command(about = "Show the freshness of every cached source")]
    Status(CommonArgs),
}

#[derive(Args, Clone)]
struct CommonArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    root_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    #[arg(long)]
    force: bool,

    #[arg(long, value_enum)]
    edge_policy: Option<EdgePolicy>,

    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingSource { .. }
        | KiraError::Parse { .. }
        | KiraError::ParserFailed { .. } => 2,
        KiraError::Fetch { .. }
        | KiraError::FetchStatus { .. }
        | KiraError::StoreHttp(_)
        | KiraError::StoreStatus { .. }
        | KiraError::StoreStatement { .. }
        | KiraError::StoreWrite { .. }
        | KiraError::UnresolvedEndpoint { .. } => 3,
        KiraError::Cancelled { .. } => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Status(args) => run_status(args),
    }
}

fn resolve_config(args: &CommonArgs) -> Result<RunConfig, KiraError> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(root_dir) = &args.root_dir {
        config.root_dir = root_dir.clone();
    }
    Ok(config)
}

fn output_mode(args: &CommonArgs) -> OutputMode {
    if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}

fn run_pipeline(args: RunArgs) -> miette::Result<u8> {
    let mut config = resolve_config(&args.common)?;
    if let Some(mode) = args.mode {
        config.run_mode = mode;
    }
    if let Some(policy) = args.edge_policy {
        config.edge_policy = policy;
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    tracing::debug!(?config, "resolved configuration");

    let fetcher = HttpFetcher::new(config.fetch_timeout)?.with_retry(config.retry);
    let options = RunOptions { force: args.force };
    let mode = output_mode(&args.common);

    match config.run_mode {
        RunMode::Test => {
            let pipeline = Pipeline::bundled(config, MemoryGraphStore::new(), Arc::new(fetcher));
            execute(&pipeline, options, mode)
        }
        RunMode::Prod => {
            let graph = Neo4jHttpStore::new(&config.store, config.store_timeout)?;
            let pipeline = Pipeline::bundled(config, graph, Arc::new(fetcher));
            execute(&pipeline, options, mode)
        }
    }
}

fn execute<G: GraphStore>(
    pipeline: &Pipeline<G>,
    options: RunOptions,
    mode: OutputMode,
) -> miette::Result<u8> {
    let sink: &dyn ProgressSink = match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let report = pipeline.run(options, sink)?;
    match mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_report(&report),
    }
    Ok(if report.has_failures() {
        EXIT_PARTIAL_FAILURE
    } else {
        0
    })
}

fn run_status(args: CommonArgs) -> miette::Result<u8> {
    let config = resolve_config(&args)?;
    let fetcher = HttpFetcher::new(config.fetch_timeout)?;
    let pipeline = Pipeline::bundled(config, MemoryGraphStore::new(), Arc::new(fetcher));
    match output_mode(&args) {
        OutputMode::Json => {
            let status = pipeline.status(&JsonOutput)?;
            JsonOutput::print_status(&status).into_diagnostic()?;
        }
        OutputMode::Text => {
            let status = pipeline.status(&TextOutput)?;
            TextOutput::print_status(&status);
        }
    }
    Ok(0)
}
