use anyhow::Result;
use clap::{Parser, Subcommand};
use ingest_cli::{report, watch};
use ingest_core::config;
use ingest_core::config::AppConfig;
use ingest_core::pipeline::Pipeline;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch => run_watch(cfg).await,
        Commands::Process { paths, json } => run_process(cfg, paths, json).await,
        Commands::Stats { json } => run_stats(cfg, json).await,
        Commands::Prune {
            dry_run,
            delete_derivatives,
            json,
        } => run_prune(cfg, dry_run, delete_derivatives, json).await,
    }
}

#[derive(Parser)]
#[command(name = "meme-ingest")]
#[command(about = "Image ingestion pipeline: optimized derivatives, thumbnails, and a JSON library manifest", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the input directory, then process new uploads until Ctrl-C
    Watch,
    /// Process the input directory (or the given files) once and exit
    Process {
        /// Specific source files; defaults to everything in the input directory
        paths: Vec<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Show aggregate sizes and compression from the manifest
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove manifest records whose source file no longer exists
    Prune {
        /// Only list what would be removed
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Also delete the optimized and thumbnail files of removed records
        #[arg(long, default_value_t = false)]
        delete_derivatives: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_watch(cfg: AppConfig) -> Result<ExitCode> {
    let summary = watch::watch_until_ctrl_c(cfg).await?;
    println!("{}", report::render_batch("watch", &summary, false)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_process(cfg: AppConfig, paths: Vec<PathBuf>, json: bool) -> Result<ExitCode> {
    let pipeline = Pipeline::new(&cfg).await?;
    let summary = if paths.is_empty() {
        pipeline.process_all().await
    } else {
        pipeline.process_paths(paths).await
    };
    println!("{}", report::render_batch("process", &summary, json)?);
    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_stats(cfg: AppConfig, json: bool) -> Result<ExitCode> {
    let pipeline = Pipeline::new(&cfg).await?;
    println!("{}", report::render_stats(&pipeline.stats().await, json)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_prune(
    cfg: AppConfig,
    dry_run: bool,
    delete_derivatives: bool,
    json: bool,
) -> Result<ExitCode> {
    let pipeline = Pipeline::new(&cfg).await?;
    let removed = if dry_run {
        pipeline.find_orphans().await?
    } else {
        pipeline.prune(delete_derivatives).await
    };
    println!("{}", report::render_pruned(&removed, dry_run, json)?);
    Ok(ExitCode::SUCCESS)
}
