//! litlink: search several bibliographic sources, link duplicate records
//! and write the unified set to disk.
//! Entry point for the command-line binary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use litlink_config::LitlinkConfig;
use litlink_ingestion::{JobEvent, JobRequest, JobStatus, UnifiedDownloader, YearRange};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI Definition ──────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "litlink",
    about = "Multi-source literature acquisition with record linkage",
    version,
    long_about = None,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query sent to every source
    #[arg(long, short)]
    query: Option<String>,

    /// Comma-separated source ids (default: every registered source)
    #[arg(long, value_delimiter = ',')]
    sources: Vec<String>,

    /// Maximum results requested from each source
    #[arg(long)]
    max_results: Option<usize>,

    /// Earliest publication year (inclusive)
    #[arg(long)]
    year_from: Option<i32>,

    /// Latest publication year (inclusive)
    #[arg(long)]
    year_to: Option<i32>,

    /// Export format, repeatable (json, jsonl)
    #[arg(long = "format", action = clap::ArgAction::Append)]
    formats: Vec<String>,

    /// Path to a litlink.toml (otherwise LITLINK_CONFIG or ./litlink.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for exported files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Print progress events to stderr while the job runs
    #[arg(long)]
    progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the registered source ids
    Sources,
}

impl Cli {
    fn year_range(&self) -> Option<YearRange> {
        let range = YearRange::new(self.year_from, self.year_to);
        (!range.is_unbounded()).then_some(range)
    }

    fn job_request(&self, default_sources: Vec<String>) -> anyhow::Result<JobRequest> {
        let query = self
            .query
            .clone()
            .context("--query is required unless a subcommand is given")?;
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            anyhow::ensure!(from <= to, "--year-from {from} is after --year-to {to}");
        }

        let sources = if self.sources.is_empty() {
            default_sources
        } else {
            self.sources.iter().map(|s| s.trim().to_string()).collect()
        };

        Ok(JobRequest {
            query,
            sources,
            max_results: self.max_results,
            year_range: self.year_range(),
            formats: (!self.formats.is_empty()).then(|| self.formats.clone()),
        })
    }
}

// ─── Main ────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the JSON snapshot.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("litlink=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LitlinkConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LitlinkConfig::load()?,
    };
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }

    let downloader = UnifiedDownloader::from_config(config);

    if let Some(Commands::Sources) = cli.command {
        for id in downloader.connectors().ids() {
            println!("{id}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let request = cli.job_request(downloader.connectors().ids())?;
    info!(
        query = %request.query,
        sources = ?request.sources,
        "litlink {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let printer = cli.progress.then(|| tokio::spawn(print_events(downloader.subscribe())));

    let outcome = downloader.run_job(request).await;

    if let Some(printer) = printer {
        printer.abort();
    }

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Job rejected: {e}");
            eprintln!("error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.status == JobStatus::Failed {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_events(mut rx: broadcast::Receiver<JobEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => eprintln!(
                "[{:>5.1}%] {:<16} {}",
                event.progress * 100.0,
                format!("{:?}", event.stage),
                event.message
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("... {n} progress events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
