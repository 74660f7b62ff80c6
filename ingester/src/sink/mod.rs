pub mod encoding;
pub mod local;
pub mod s3;

use crate::model::ReviewRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use ingester_core::config::{OutputBackend, OutputConfig};
use ingester_core::Result;
use std::sync::Arc;

#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Durably persist `records` as a single new object named `destination`
    /// and return where it landed. Readers never observe a partial object.
    async fn write(&self, records: &[ReviewRecord], destination: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Unique object names for one run: `{prefix}_{run_date}_{run_id}_{batch}.parquet`.
#[derive(Debug, Clone)]
pub struct DestinationNamer {
    prefix: String,
    run_date: NaiveDate,
    run_id: String,
}

impl DestinationNamer {
    pub fn new(prefix: impl Into<String>, run_date: NaiveDate, run_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            run_date,
            run_id: run_id.into(),
        }
    }

    pub fn name(&self, batch_index: u32) -> String {
        format!(
            "{}_{}_{}_{}.parquet",
            self.prefix,
            self.run_date.format("%Y-%m-%d"),
            self.run_id,
            batch_index
        )
    }
}

pub async fn connect(config: &OutputConfig) -> Result<Arc<dyn BatchWriter>> {
    let writer: Arc<dyn BatchWriter> = match config.backend {
        OutputBackend::S3 => Arc::new(s3::S3BatchWriter::new(&config.s3).await?),
        OutputBackend::Local => Arc::new(local::LocalBatchWriter::new(&config.local.directory).await?),
    };
    Ok(writer)
}
