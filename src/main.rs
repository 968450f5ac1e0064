use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use event_ingest::carpenter::Carpenter;
use event_ingest::config::Config;
use event_ingest::extraction::{TextExtractionClient, TextExtractor};
use event_ingest::logging;
use event_ingest::metrics;
use event_ingest::pipeline::IngestPipeline;
use event_ingest::sites::TransformerDispatcher;
use event_ingest::storage::{InMemoryStorage, SqliteStorage, Storage};
use event_ingest::tasks::IngestQueue;

#[derive(Parser)]
#[command(name = "event_ingest")]
#[command(about = "Normalize scraped event listings and upsert them into the event store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Directory for rolling JSON log files
    #[arg(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON file of raw listings (one object or an array) for one site
    Ingest {
        /// Site key, see `sites`
        #[arg(long)]
        site: String,
        /// JSON file with the scraped listings
        #[arg(long)]
        input: PathBuf,
        /// SQLite database path; overrides [store].sqlite_path
        #[arg(long)]
        db: Option<PathBuf>,
        /// Expose Prometheus metrics on this port while running
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// List supported site keys
    Sites,
}

fn read_listings(path: &Path) -> anyhow::Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![parsed]),
        _ => bail!("{} must contain a JSON object or an array of objects", path.display()),
    }
}

fn build_storage(config: &Config, db: Option<PathBuf>) -> anyhow::Result<Arc<dyn Storage>> {
    match db.or_else(|| config.store.sqlite_path.clone()) {
        Some(path) => Ok(Arc::new(SqliteStorage::open(&path)?)),
        None => {
            warn!("No SQLite path configured, using in-memory store");
            Ok(Arc::new(InMemoryStorage::new()))
        }
    }
}

fn build_extractor(config: &Config) -> anyhow::Result<Option<Arc<dyn TextExtractor>>> {
    match config.extraction.api_key() {
        Ok(key) => {
            let client = TextExtractionClient::from_config(&config.extraction, key)?;
            Ok(Some(Arc::new(client)))
        }
        Err(e) => {
            warn!("Extraction disabled: {}", e);
            Ok(None)
        }
    }
}

async fn run_ingest(
    config: Config,
    site: String,
    input: PathBuf,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dispatcher = TransformerDispatcher::new();
    // Fail fast on a typo instead of dead-ending every item
    dispatcher.resolve(&site)?;

    let listings = read_listings(&input)?;
    let storage = build_storage(&config, db)?;

    let mut pipeline = IngestPipeline::new(dispatcher, Carpenter::new(storage.clone()))
        .with_extraction_timeout(config.extraction.task_timeout());
    if let Some(extractor) = build_extractor(&config)? {
        pipeline = pipeline.with_extractor(extractor);
    }
    let pipeline = Arc::new(pipeline);

    info!("Ingesting {} listings for {}", listings.len(), site);
    let queue = IngestQueue::start(pipeline.clone(), config.worker.concurrency);
    for raw in listings {
        queue.enqueue(site.as_str(), raw);
    }
    let stats = queue.shutdown().await;

    println!("\n📊 Ingest results for {}:", site);
    println!("   Enqueued: {}", stats.enqueued);
    println!("   Upserted: {}", stats.upserted);
    println!("   Rejected: {}", stats.rejected);
    println!("   Extraction failed: {}", stats.extraction_failed);
    println!("   Persist failed: {}", stats.persist_failed);
    println!("   Events in store: {}", storage.count_events().await?);

    let dead_letters = pipeline.dead_letters().entries();
    if !dead_letters.is_empty() {
        warn!("{} items dead-lettered", dead_letters.len());
        println!("\n⚠️  Dead letters:");
        for letter in &dead_letters {
            println!(
                "   - [{}] {}: {}",
                letter.stage.as_str(),
                letter.external_id.as_deref().unwrap_or("-"),
                letter.reason
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logging::init_logging(&cli.log_dir);
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            site,
            input,
            db,
            metrics_port,
        } => {
            if let Some(port) = metrics_port {
                metrics::init_metrics(port);
            }
            if let Err(e) = run_ingest(config, site, input, db).await {
                error!("Ingest failed: {:#}", e);
                return Err(e);
            }
        }
        Commands::Sites => {
            let dispatcher = TransformerDispatcher::new();
            for site in dispatcher.list_sites() {
                let transformer = dispatcher.resolve(site)?;
                let profile = transformer.profile();
                let mode = format!("{:?}", profile.mode);
                println!("{:<28} {:<9} {}", site, mode, profile.organization);
            }
        }
    }
    Ok(())
}
