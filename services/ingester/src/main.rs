//! Raster ingestion worker.
//!
//! Sweeps object storage for new source files, renders every configured
//! variable into web-ready assets and records the results, coordinating
//! with other workers through the ingestion log.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use config::IngesterConfig;
use formats::FormatRegistry;
use ingestion::{sweep, IngestionResult, IngestionService};
use pyramid::PyramidStore;
use raster_common::{RasterError, RasterResult};
use storage::{parse_incoming, IngestLog, MetadataStore, ObjectStorage};

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Raster ingestion worker for gridded data catalogs")]
struct Args {
    /// Configuration file path (falls back to environment variables)
    #[arg(short, long)]
    config: Option<String>,

    /// Process a single storage path and exit
    #[arg(short, long)]
    file: Option<String>,

    /// Catalog override for --file (otherwise inferred from the path)
    #[arg(long)]
    catalog: Option<String>,

    /// Collection override for --file
    #[arg(long)]
    collection: Option<String>,

    /// Run one sweep cycle and exit (vs continuous polling)
    #[arg(long)]
    once: bool,

    /// List permanently failed files and exit
    #[arg(long)]
    failed: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting raster ingester");

    let config = match &args.config {
        Some(path) => IngesterConfig::from_yaml(path)?,
        None => IngesterConfig::from_env()?,
    };

    let worker = Worker::new(&config).await?;

    if args.failed {
        return worker.print_permanently_failed().await;
    }

    if let Some(path) = &args.file {
        return worker
            .process_one(path, args.catalog.as_deref(), args.collection.as_deref())
            .await;
    }

    if args.once {
        info!("Running single sweep cycle");
        worker.run_cycle().await?;
    } else {
        info!(
            interval_secs = config.poll_interval_secs,
            "Starting continuous polling"
        );
        worker.run_forever(config.poll_interval_secs).await?;
    }

    Ok(())
}

/// One ingestion worker: sweeps the log, claims files and runs the pipeline.
struct Worker {
    worker_id: String,
    storage: Arc<ObjectStorage>,
    log: IngestLog,
    service: IngestionService,
}

impl Worker {
    async fn new(config: &IngesterConfig) -> Result<Self> {
        let catalogs = config.load_catalogs()?;
        info!(
            catalogs = ?catalogs.catalogs.iter().map(|c| c.slug.as_str()).collect::<Vec<_>>(),
            "Loaded catalog definitions"
        );

        let storage = Arc::new(ObjectStorage::new(&config.storage)?);

        let log = IngestLog::connect(&config.database_url).await?;
        log.migrate().await?;

        let records = MetadataStore::connect(&config.database_url).await?;
        records.migrate().await?;

        std::fs::create_dir_all(&config.scratch_dir)
            .with_context(|| format!("Failed to create scratch dir {}", config.scratch_dir))?;

        let service = IngestionService::new(
            catalogs,
            FormatRegistry::with_builtin_plugins(),
            storage.clone(),
            records,
            PyramidStore::new(&config.pyramid_dir),
            &config.scratch_dir,
        );

        let worker_id = format!("ingester-{}", Uuid::new_v4());
        info!(worker_id = %worker_id, "Worker ready");

        Ok(Self {
            worker_id,
            storage,
            log,
            service,
        })
    }

    /// Run sweep cycles forever.
    async fn run_forever(&self, poll_interval_secs: u64) -> Result<()> {
        loop {
            info!("Starting sweep cycle");

            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Sweep cycle failed");
            }

            info!(
                interval_secs = poll_interval_secs,
                "Sleeping until next cycle"
            );
            tokio::time::sleep(std::time::Duration::from_secs(poll_interval_secs)).await;
        }
    }

    /// One sweep pass: reconcile the log, then process everything claimable.
    async fn run_cycle(&self) -> RasterResult<()> {
        let report = sweep(&self.storage, &self.log).await?;

        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut skipped = 0u32;

        for path in report.work() {
            match self.claim_and_run(path, None, None).await {
                Ok(result) if result.success => completed += 1,
                Ok(_) => failed += 1,
                Err(e) if e.is_contention() => {
                    info!(path = %path, "Locked by another worker, skipping");
                    skipped += 1;
                }
                Err(e) => {
                    error!(path = %path, error = %e, "Processing failed");
                    failed += 1;
                }
            }
        }

        info!(completed, failed, skipped, "Sweep cycle complete");
        Ok(())
    }

    /// Claim one path in the log, run the pipeline and record the outcome.
    async fn claim_and_run(
        &self,
        path: &str,
        catalog: Option<&str>,
        collection: Option<&str>,
    ) -> RasterResult<IngestionResult> {
        let parsed = parse_incoming(path)?;

        if !self
            .log
            .acquire(&parsed.bucket, path, &self.worker_id)
            .await?
        {
            return Err(RasterError::LockContention(format!(
                "Could not claim '{}' (locked by another worker or out of retries)",
                path
            )));
        }

        match self.service.process_file(path, catalog, collection).await {
            Ok(result) => {
                if result.success {
                    self.log
                        .mark_completed(
                            &parsed.bucket,
                            path,
                            result.archive_path.as_deref(),
                            result.items,
                            result.assets,
                        )
                        .await?;
                    info!(
                        path = %path,
                        items = result.items,
                        assets = result.assets,
                        "File completed"
                    );
                } else {
                    let error = result.errors.join("; ");
                    self.log.mark_failed(&parsed.bucket, path, &error).await?;
                    warn!(
                        path = %path,
                        items = result.items,
                        assets = result.assets,
                        error = %error,
                        "File failed, will retry"
                    );
                }
                Ok(result)
            }
            Err(e) => {
                self.log
                    .mark_failed(&parsed.bucket, path, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Process one explicit path, registering it in the log first.
    async fn process_one(
        &self,
        path: &str,
        catalog: Option<&str>,
        collection: Option<&str>,
    ) -> Result<()> {
        let parsed = parse_incoming(path)?;
        self.log.register(&parsed.bucket, path).await?;

        if self.log.is_done(&parsed.bucket, path).await? {
            info!(path = %path, "Already completed, nothing to do");
            return Ok(());
        }

        let result = self.claim_and_run(path, catalog, collection).await?;
        if !result.success {
            anyhow::bail!(
                "{} variable(s) failed: {}",
                result.errors.len(),
                result.errors.join("; ")
            );
        }

        Ok(())
    }

    /// Print entries that exhausted their retries.
    async fn print_permanently_failed(&self) -> Result<()> {
        let entries = self.log.get_permanently_failed().await?;

        if entries.is_empty() {
            println!("No permanently failed files");
            return Ok(());
        }

        println!("{} permanently failed file(s):", entries.len());
        for entry in entries {
            println!(
                "  {} (attempts: {}, last update: {})",
                entry.file_path, entry.retry_count, entry.updated_at
            );
            if let Some(error) = &entry.last_error {
                println!("    {}", error);
            }
        }

        Ok(())
    }
}
