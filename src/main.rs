//! Aidstats CLI
//!
//! Runs one pipeline stage per invocation:
//! - loop: extract every document into `loop/`
//! - aggregate: combine records per publisher and globally
//! - invert: build inverted indices
//! - gitaggregate / gitaggregate-publisher: replay the output history
//! - traceable: write the traceability report

use aidstats::config::{generate_default_config, Config, LoggingConfig};
use aidstats::{
    load_global, run_loop, traceable_rows, write_traceable_csv, Aggregator, Extractor,
    GitHistoryLog, HistoryLog, Inverter, OutputLayout, ReferenceData, TemporalAggregator,
    TemporalSummary,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "aidstats")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Statistics over a corpus of aid activity and organisation documents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: searched in the usual locations)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Source documents directory
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Output directory
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Reference data directory
    #[arg(long)]
    pub helpers: Option<PathBuf>,

    /// Git repository holding committed output
    #[arg(long)]
    pub history: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract metrics from every source document
    Loop {
        /// Number of extraction workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Aggregate extracted records per publisher and globally
    Aggregate,

    /// Build inverted indices from extracted records
    Invert,

    /// Replay the history of the global aggregate
    Gitaggregate,

    /// Replay the history of every publisher aggregate
    GitaggregatePublisher,

    /// Write the traceability report as CSV
    Traceable {
        /// Output file (default: stdout)
        #[arg(short = 'o', long = "file")]
        file: Option<PathBuf>,
    },

    /// Print or write a default config file
    Config {
        /// Output file (default: stdout)
        #[arg(short = 'o', long = "file")]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { file } = &cli.command {
        return write_default_config(file.as_ref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    apply_cli_overrides(&mut config, &cli);

    init_logging(&config.logging)?;

    if let Err(e) = run(cli.command, config).await {
        tracing::error!(error = %format!("{:#}", e), "Stage failed");
        return Err(e);
    }
    Ok(())
}

/// Command line flags take precedence over file and environment
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(data) = &cli.data {
        config.paths.data_dir = data.clone();
    }
    if let Some(output) = &cli.output {
        config.paths.output_dir = output.clone();
    }
    if let Some(helpers) = &cli.helpers {
        config.paths.helpers_dir = helpers.clone();
    }
    if let Some(history) = &cli.history {
        config.paths.history_dir = history.clone();
    }
    if let Commands::Loop {
        workers: Some(workers),
    } = &cli.command
    {
        config.extract.workers = *workers;
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("aidstats=info"));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = config.file.is_none();

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init(),
    }
    Ok(())
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    let layout = OutputLayout::new(&config.paths.output_dir);

    match command {
        Commands::Loop { .. } => {
            let reference = ReferenceData::load(&config.paths.helpers_dir)
                .context("Failed to load reference data")?;
            let extractor = Arc::new(Extractor::new(Arc::new(reference)));
            let summary = run_loop(
                extractor,
                &config.paths.data_dir,
                &layout,
                &config.extract.loop_options(),
            )
            .await?;

            println!(
                "loop {}: extracted {} of {} documents, {} failed",
                summary.run_id, summary.extracted, summary.documents, summary.failed
            );
        }

        Commands::Aggregate => {
            let summary = Aggregator::default().run(&layout)?;
            println!(
                "aggregate: {} publishers, {} documents aggregated, {} not aggregated",
                summary.publishers, summary.documents_aggregated, summary.documents_not_aggregated
            );
        }

        Commands::Invert => {
            let summary = Inverter::new(config.invert.metrics.clone()).run(&layout)?;
            println!(
                "invert: {} indices over {} records, {} distinct values",
                summary.indices, summary.records, summary.values
            );
        }

        Commands::Gitaggregate => {
            let summary = temporal(&config, layout).run_global().await?;
            print_temporal("gitaggregate", &summary);
        }

        Commands::GitaggregatePublisher => {
            let summary = temporal(&config, layout).run_publishers().await?;
            print_temporal("gitaggregate-publisher", &summary);
        }

        Commands::Traceable { file } => {
            let global = load_global(&layout).context("Run aggregate before traceable")?;
            let rows = traceable_rows(&global);
            match &file {
                Some(path) => {
                    let out = std::fs::File::create(path)
                        .with_context(|| format!("Failed to create {:?}", path))?;
                    write_traceable_csv(&rows, out)?;
                    println!("traceable: {} publishers written to {:?}", rows.len(), path);
                }
                None => write_traceable_csv(&rows, std::io::stdout().lock())?,
            }
        }

        Commands::Config { file } => write_default_config(file.as_ref())?,
    }

    Ok(())
}

fn temporal(config: &Config, layout: OutputLayout) -> TemporalAggregator {
    let log: Arc<dyn HistoryLog> = Arc::new(GitHistoryLog::new(&config.paths.history_dir));
    TemporalAggregator::new(log, layout, config.temporal.temporal_options())
}

fn print_temporal(stage: &str, summary: &TemporalSummary) {
    println!(
        "{}: {} scopes, {} commits scanned, {} snapshots written, {} reused, {} removed, {} blocked",
        stage,
        summary.scopes,
        summary.commits_scanned,
        summary.written,
        summary.reused,
        summary.removed,
        summary.blocked.len()
    );
    for (scope, reason) in &summary.blocked {
        println!("  blocked {}: {}", scope, reason);
    }
}

fn write_default_config(file: Option<&PathBuf>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match file {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write config to {:?}", path))?;
            println!("Wrote default config to {:?}", path);
        }
        None => print!("{}", content),
    }
    Ok(())
}
