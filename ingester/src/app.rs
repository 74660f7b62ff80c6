use crate::backfill;
use crate::catalog;
use crate::checkpoint::{self, CheckpointStore, PostgresCheckpointStore};
use crate::model::{CatalogItem, RunSummary};
use crate::pipeline::Pipeline;
use crate::sink::{self, s3};
use crate::source::SteamReviewClient;
use ingester_core::config::{CheckpointBackend, OutputBackend, OutputConfig};
use ingester_core::{Config, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

/// Where the run's catalog snapshot comes from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    File(PathBuf),
    SteamAppList,
}

pub struct App {
    config: Config,
    store: Arc<dyn CheckpointStore>,
}

impl App {
    #[instrument(skip(config), fields(checkpoint = ?config.checkpoint.backend))]
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing application");

        let store = checkpoint::connect(&config.checkpoint).await?;
        info!(store = store.name(), "Checkpoint store connected");

        Ok(Self { config, store })
    }

    pub async fn load_catalog(
        &self,
        source: &CatalogSource,
        limit: Option<usize>,
    ) -> Result<Vec<CatalogItem>> {
        let mut items = match source {
            CatalogSource::File(path) => catalog::load_file(path).await?,
            CatalogSource::SteamAppList => catalog::fetch_app_list(&self.config.source).await?,
        };

        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    /// One full pass over `items`. Ctrl-C stops the walk; buffered records
    /// and their checkpoints are still flushed before returning.
    pub async fn run_ingestion(&self, items: &[CatalogItem]) -> Result<RunSummary> {
        let source = Arc::new(SteamReviewClient::new(&self.config.source)?);
        let writer = sink::connect(&self.config.output).await?;
        info!(writer = writer.name(), items = items.len(), "Starting ingestion");

        let pipeline = Pipeline::new(source, writer, &self.config);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    let _ = shutdown_tx.send(()).await;
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        pipeline
            .run(Arc::clone(&self.store), items, shutdown_rx)
            .await
    }

    /// Seed checkpoints from `parquet_dir`, or from wherever `run` writes
    /// batches when no directory is given.
    pub async fn run_backfill(&self, parquet_dir: Option<PathBuf>) -> Result<usize> {
        let output = &self.config.output;
        let scanned = match (parquet_dir, &output.backend) {
            (Some(directory), _) => backfill::scan_directory(directory).await?,
            (None, OutputBackend::Local) => {
                backfill::scan_directory(PathBuf::from(&output.local.directory)).await?
            }
            (None, OutputBackend::S3) => {
                let client = s3::build_client(&output.s3).await;
                let key_prefix = batch_key_prefix(output);
                info!(bucket = %output.s3.bucket, prefix = %key_prefix, "Backfilling from object storage");
                backfill::scan_bucket(&client, &output.s3.bucket, &key_prefix).await?
            }
        };

        backfill::apply(self.store.as_ref(), scanned).await
    }
}

/// Key prefix shared by every batch object `run` writes.
fn batch_key_prefix(output: &OutputConfig) -> String {
    s3::object_key(&output.s3.prefix, &format!("{}_", output.file_prefix))
}

/// Create the checkpoint table. Only the Postgres backend has a schema.
pub async fn migrate(config: &Config) -> Result<()> {
    match config.checkpoint.backend {
        CheckpointBackend::Postgres => {
            let store = PostgresCheckpointStore::connect(&config.checkpoint.postgres).await?;
            store.migrate().await
        }
        CheckpointBackend::Firestore => {
            info!("Firestore backend has no schema to migrate");
            Ok(())
        }
    }
}
