use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use violations_tracker::apis;
use violations_tracker::config::{Config, DEFAULT_CONFIG_PATH};
use violations_tracker::constants;
use violations_tracker::logging;
use violations_tracker::metrics;
use violations_tracker::pipeline::{IngestOptions, IngestPipeline, RunStatus, RunSummary};
use violations_tracker::query::QueryService;
use violations_tracker::server::{self, AppState};
use violations_tracker::storage::{SqliteStore, ViolationStore};

#[derive(Parser)]
#[command(name = "violations_tracker")]
#[command(about = "Factory farm violations tracker: ingestion and JSON API")]
#[command(version)]
struct Cli {
    /// Config file (default: $VIOLATIONS_CONFIG or config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass and print its summary
    Ingest {
        /// Adapters to run (comma-separated). Available: seed, openfda, epa_echo
        #[arg(long)]
        sources: Option<String>,
        /// Ignore stored since-cursors and fetch everything
        #[arg(long)]
        full: bool,
    },
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Kick off a background ingestion run once the server is up
        #[arg(long)]
        ingest_on_start: bool,
    },
    /// Create the database schema
    InitDb,
    /// Show recent ingestion runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn parse_sources(list: &str) -> Vec<String> {
    list.split(',')
        .map(constants::adapter_name_to_internal)
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_pipeline(
    config: &Config,
    store: Arc<dyn ViolationStore>,
    sources: Option<&[String]>,
) -> Result<IngestPipeline> {
    let adapters = apis::build_adapters(config, sources)?;
    if adapters.is_empty() {
        warn!("No adapters enabled; ingestion runs will do nothing");
    }
    Ok(IngestPipeline::new(
        store,
        adapters,
        IngestOptions::from(&config.ingest),
    )?)
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun {} ({})", summary.run_id, summary.status.as_str());
    println!(
        "   {:<10} {:>10} {:>8} {:>8} {:>9} {:>10} {:>8} {:>8}",
        "adapter", "status", "fetched", "inserted", "updated", "unchanged", "dupes", "rejected"
    );
    for adapter in &summary.adapters {
        let status = serde_json::to_value(adapter.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!(
            "   {:<10} {:>10} {:>8} {:>8} {:>9} {:>10} {:>8} {:>8}",
            adapter.adapter,
            status,
            adapter.counts.fetched,
            adapter.counts.inserted,
            adapter.counts.updated,
            adapter.counts.unchanged,
            adapter.counts.duplicates,
            adapter.counts.rejected
        );
        for (reason, count) in &adapter.rejections {
            println!("      rejected {reason}: {count}");
        }
        if let Some(err) = &adapter.error {
            println!("      error: {err}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var_os("VIOLATIONS_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    config.apply_env_overrides()?;

    let _log_guard = logging::init_logging(&config.logging);
    info!(config = %config_path.display(), "violations_tracker starting");

    match cli.command {
        Commands::InitDb => {
            SqliteStore::open(&config.database.path).context("initializing database")?;
            println!("Database initialized at {}", config.database.path.display());
        }
        Commands::Runs { limit } => {
            let store = SqliteStore::open(&config.database.path)?;
            for run in store.recent_runs(limit).await? {
                print_summary(&run);
            }
        }
        Commands::Ingest { sources, full } => {
            let store: Arc<dyn ViolationStore> = Arc::new(SqliteStore::open(&config.database.path)?);
            let sources = sources.as_deref().map(parse_sources);
            let pipeline = build_pipeline(&config, store, sources.as_deref())?;

            let summary = pipeline.run(full).await?;
            print_summary(&summary);
            if summary.status == RunStatus::Failed {
                anyhow::bail!("ingestion run {} failed", summary.run_id);
            }
        }
        Commands::Serve {
            port,
            ingest_on_start,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            metrics::init_metrics();

            let store: Arc<dyn ViolationStore> = Arc::new(SqliteStore::open(&config.database.path)?);
            let pipeline = Arc::new(build_pipeline(&config, store.clone(), None)?);
            let query = Arc::new(QueryService::new(
                store,
                config.server.default_per_page,
                config.server.max_per_page,
            ));

            if ingest_on_start {
                // A failed or blocked run must never keep the API from serving stored data
                match pipeline.try_begin(false).await {
                    Ok(run) => {
                        tokio::spawn(async move {
                            if let Err(e) = run.execute().await {
                                error!("startup ingestion failed: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("startup ingestion skipped: {}", e),
                }
            }

            server::start_server(AppState { query, pipeline }, &config.server).await?;
        }
    }
    Ok(())
}
