use clap::{Parser, Subcommand};
use deskwatch_core::{Corpus, DeskwatchConfig, ItemId, ResultStore, WorkflowClient, WorkflowConfig};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use deskwatch_pipeline::pipeline::{self, ProcessReport, ProcessSettings};
use deskwatch_pipeline::subsystems::aggregate;
use deskwatch_pipeline::subsystems::darkframe::StdDevClassifier;

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch desk-occupancy inference and time-bucket aggregation")]
struct Args {
    #[arg(short, long, env = "DESKWATCH_CONFIG", default_value = "deskwatch.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter and run inference on every unprocessed image
    Process {
        /// Maximum number of images to take this run (overrides dispatch.batch_cap)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Fold stored results into the time-bucket summary file
    Aggregate {
        /// Output path (overrides paths.summary_path)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Process, then aggregate
    Run {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show corpus and result-store progress
    Status {
        /// Report a single item instead
        #[arg(long)]
        item: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (INFERENCE_API_KEY)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match DeskwatchConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let corpus = Corpus::new(config.paths.corpus_path(), &config.paths.image_extensions);
    let store = ResultStore::open(config.paths.result_path())?;

    match args.command {
        Command::Process { limit } => {
            let report = run_process(&config, &corpus, &store, limit).await?;
            check_store_failures(&report)?;
        }
        Command::Aggregate { output } => {
            run_aggregate(&config, &store, output)?;
        }
        Command::Run { limit } => {
            let report = run_process(&config, &corpus, &store, limit).await?;
            run_aggregate(&config, &store, None)?;
            check_store_failures(&report)?;
        }
        Command::Status { item, json } => {
            if let Some(id) = item {
                let status = pipeline::item_status(&store, &ItemId::new(id.clone()))?;
                println!("{}: {:?}", id, status);
                return Ok(());
            }
            let report = pipeline::status(&corpus, &store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Images found:       {}", report.corpus_items);
                println!("Results stored:     {}", report.stored);
                println!("  inferred:         {}", report.inferred);
                println!("  discarded (dark): {}", report.discarded);
                println!("  unreadable:       {}", report.unreadable);
                println!("  orphaned:         {}", report.orphaned);
                println!("Pending:            {}", report.pending);
            }
        }
    }

    Ok(())
}

async fn run_process(
    config: &DeskwatchConfig,
    corpus: &Corpus,
    store: &ResultStore,
    limit: Option<usize>,
) -> anyhow::Result<ProcessReport> {
    let backend = WorkflowClient::new(WorkflowConfig::from_dispatch(&config.dispatch))?;
    let classifier = StdDevClassifier::new(config.filter.std_threshold);

    let mut settings = ProcessSettings::from(config);
    if limit.is_some() {
        settings.batch_cap = limit;
    }

    let report = pipeline::process(
        corpus,
        store,
        Arc::new(classifier),
        Arc::new(backend),
        &settings,
    )
    .await?;

    println!("Selected:      {} of {} pending", report.selected, report.pending);
    println!("Discarded:     {}", report.discarded);
    println!("Inferred:      {}", report.inferred);
    println!(
        "Errors:        {} classify, {} service, {} store",
        report.classify_errors,
        report.service_errors,
        report.store_failures()
    );

    Ok(report)
}

fn run_aggregate(
    config: &DeskwatchConfig,
    store: &ResultStore,
    output: Option<String>,
) -> anyhow::Result<()> {
    let (summary, report) = aggregate::aggregate_store(store, &config.aggregate)?;
    let path = output
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.paths.summary_file());
    aggregate::write_summary(&path, &summary)?;

    println!(
        "Wrote {} buckets to {} ({} records, {} sparse buckets dropped, {} unreadable)",
        report.buckets_kept,
        path.display(),
        report.records_read,
        report.buckets_dropped,
        report.unreadable
    );
    Ok(())
}

fn check_store_failures(report: &ProcessReport) -> anyhow::Result<()> {
    let failures = report.store_failures();
    if failures > 0 {
        tracing::error!(failures, "Result store rejected writes");
        anyhow::bail!(
            "{} result writes failed; check that the result directory is writable",
            failures
        );
    }
    Ok(())
}
