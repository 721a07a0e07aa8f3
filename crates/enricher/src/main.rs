//! enricher - background file-enrichment worker.
//!
//! Pulls enrichment jobs from the queue, extracts text from the stored file,
//! asks the language model for a summary and keywords, and writes the result
//! back to the file record.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

use enricher::config::{load_or_default, Config};
use enricher::db::Database;
use enricher::queue::{open_broker, Broker};
use enricher::storage::{HttpDownloader, SupabaseStorage};
use enricher::{
    init_logging, ConfigError, EnricherError, GeminiClient, JobProducer, LogFormat, Pipeline,
    PipelineConfig, PoolConfig, ProducerOutcome, QueueError, SqliteMetadataStore, UploadedFile,
    WorkerEvent, WorkerPool,
};

#[derive(Parser)]
#[command(name = "enricher", version, about = "Background file-enrichment worker")]
struct Cli {
    /// Path to a JSON config file. Defaults plus ENRICHER_* overrides when omitted.
    #[arg(long, global = true, env = "ENRICHER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty, env = "ENRICHER_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool until interrupted.
    Work {
        /// Overrides worker.concurrency.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Register an uploaded file and queue it for enrichment.
    Enqueue {
        #[arg(long)]
        file_id: String,
        /// Object store path, e.g. `u1/root/report.pdf`.
        #[arg(long)]
        path: String,
        /// Extension hint, e.g. `pdf`.
        #[arg(long = "type")]
        file_type: String,
        /// MIME type declared by the uploader.
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        size: Option<u64>,
    },
    /// Show queue and file-record counts.
    Status,
    /// List jobs that exhausted their retries.
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), EnricherError> {
    let mut config = load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Work { concurrency } => {
            if let Some(n) = concurrency.filter(|n| *n > 0) {
                config.worker.concurrency = n;
            }
            work(&config).await
        }
        Command::Enqueue {
            file_id,
            path,
            file_type,
            mime,
            size,
        } => {
            let mut file = UploadedFile::new(file_id, path, file_type);
            file.mime_type = mime;
            file.file_size = size;
            enqueue(&config, &file).await
        }
        Command::Status => status(&config).await,
        Command::DeadLetters { limit, json } => dead_letters(&config, limit, json).await,
    }
}

fn open_database(config: &Config) -> Result<Database, EnricherError> {
    let path = config
        .database
        .resolved_path()
        .ok_or(ConfigError::Missing("database.path"))?;
    info!("Using database {}", path.display());
    Ok(Database::open(&path)?)
}

async fn open_queue(config: &Config, db: &Database) -> Result<Arc<dyn Broker>, EnricherError> {
    let broker = open_broker(config, db).await?;
    info!(backend = broker.backend(), queue = %config.queue.name, "Queue ready");
    Ok(broker)
}

async fn work(config: &Config) -> Result<(), EnricherError> {
    info!("Starting enricher v{}", env!("CARGO_PKG_VERSION"));

    let db = open_database(config)?;
    let broker = open_queue(config, &db).await?;
    let store = Arc::new(SqliteMetadataStore::new(db));
    let storage = Arc::new(SupabaseStorage::from_config(&config.storage)?);
    let downloader = Arc::new(HttpDownloader::new(Duration::from_secs(
        config.storage.timeout_secs,
    ))?);
    let inference = Arc::new(GeminiClient::from_config(&config.inference)?);
    info!(model = inference.model(), "Inference client ready");

    let pipeline = Arc::new(Pipeline::new(
        PipelineConfig::from_config(config),
        storage,
        downloader,
        inference,
        store,
    ));
    let pool = WorkerPool::new(broker, pipeline, PoolConfig::from_config(config));
    let mut events = pool.subscribe();
    let handle = pool.start();

    let report = tokio::spawn(async move {
        let (mut done, mut dead) = (0u64, 0u64);
        loop {
            match events.recv().await {
                Ok(WorkerEvent::JobCompleted { .. } | WorkerEvent::JobSkipped { .. }) => done += 1,
                Ok(WorkerEvent::JobDeadLettered { .. }) => dead += 1,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        (done, dead)
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    handle.shutdown_and_wait().await?;

    if let Ok((done, dead)) = report.await {
        info!(completed = done, dead_lettered = dead, "Worker pool stopped");
    }
    Ok(())
}

async fn enqueue(config: &Config, file: &UploadedFile) -> Result<(), EnricherError> {
    let db = open_database(config)?;
    let broker = open_queue(config, &db).await?;
    let store = Arc::new(SqliteMetadataStore::new(db));
    let producer = JobProducer::new(broker, store);

    match producer.register_upload(file).await? {
        ProducerOutcome::Enqueued(job_id) => println!("Enqueued job {}", job_id),
        ProducerOutcome::MarkedReady => println!("Image file marked ready; no job queued"),
        ProducerOutcome::AlreadyRegistered => println!("File already registered; no job queued"),
    }
    Ok(())
}

async fn status(config: &Config) -> Result<(), EnricherError> {
    let db = open_database(config)?;
    let broker = open_queue(config, &db).await?;
    let store = SqliteMetadataStore::new(db);

    let stats = broker.stats().await?;
    println!("Queue '{}' ({})", config.queue.name, broker.backend());
    println!("  waiting  {:>6}", stats.waiting);
    println!("  delayed  {:>6}", stats.delayed);
    println!("  active   {:>6}", stats.active);
    println!("  dead     {:>6}", stats.dead);

    println!("Files");
    for (status, count) in store.status_counts().await? {
        println!("  {:<10}{:>6}", status, count);
    }
    Ok(())
}

async fn dead_letters(config: &Config, limit: usize, json: bool) -> Result<(), EnricherError> {
    let db = open_database(config)?;
    let broker = open_queue(config, &db).await?;
    let letters = broker.dead_letters(limit).await?;

    if json {
        let out = serde_json::to_string_pretty(&letters).map_err(QueueError::from)?;
        println!("{}", out);
        return Ok(());
    }

    if letters.is_empty() {
        println!("No dead-lettered jobs");
        return Ok(());
    }
    for letter in letters {
        println!(
            "{}  {}  file={}  attempt={}  {}",
            letter.failed_at.format("%Y-%m-%d %H:%M:%S"),
            letter.job_id,
            letter.payload.file_id,
            letter.attempt,
            letter.reason
        );
    }
    Ok(())
}
