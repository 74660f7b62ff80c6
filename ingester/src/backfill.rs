//! Seed checkpoints from Parquet batches that already exist, so a store that
//! was lost or never populated does not trigger a full re-crawl.

use crate::checkpoint::{CheckpointStore, Timestamps};
use arrow::array::{Array, Int64Array};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use ingester_core::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::file::reader::ChunkReader;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const APPID_COLUMN: &str = "appid";
const CREATED_COLUMN: &str = "timestamp_created";

/// Raise every checkpoint to the newest review found in `scanned`. Returns
/// how many checkpoints changed.
#[instrument(skip_all, fields(store = store.name(), scanned = scanned.len()))]
pub async fn apply(store: &dyn CheckpointStore, scanned: Timestamps) -> Result<usize> {
    let existing = store.load_latest_timestamps().await?;

    let updates: Timestamps = scanned
        .into_iter()
        .filter(|(app_id, ts)| existing.get(app_id).map_or(true, |current| ts > current))
        .collect();

    if updates.is_empty() {
        info!("Checkpoints already cover every batch, nothing to backfill");
        return Ok(0);
    }

    store.update_latest_timestamps(&updates).await?;
    info!(updated = updates.len(), "Backfill completed");
    Ok(updates.len())
}

/// Max `timestamp_created` per `appid` across every `*.parquet` file.
pub async fn scan_directory(directory: PathBuf) -> Result<Timestamps> {
    tokio::task::spawn_blocking(move || {
        let files = parquet_files(&directory)?;
        info!(files = files.len(), directory = %directory.display(), "Scanning parquet files");

        let mut latest = Timestamps::new();
        for path in &files {
            let label = path.display().to_string();
            let rows = scan_reader(&label, File::open(path)?, &mut latest)?;
            debug!(path = %label, rows, "Scanned file");
        }
        Ok::<_, Error>(latest)
    })
    .await
    .map_err(|e| Error::Internal(format!("scan task failed: {}", e)))?
}

/// Same as [`scan_directory`] for batches written to object storage under
/// `key_prefix`.
#[instrument(skip(client))]
pub async fn scan_bucket(client: &S3Client, bucket: &str, key_prefix: &str) -> Result<Timestamps> {
    let keys = list_batch_keys(client, bucket, key_prefix).await?;
    info!(objects = keys.len(), "Scanning parquet objects");

    let mut latest = Timestamps::new();
    for key in &keys {
        let object = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("failed to get s3://{}/{}: {}", bucket, key, e)))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("failed to read s3://{}/{}: {}", bucket, key, e)))?
            .into_bytes();

        let rows = scan_bytes(key, body, &mut latest)?;
        debug!(key = %key, rows, "Scanned object");
    }
    Ok(latest)
}

async fn list_batch_keys(client: &S3Client, bucket: &str, key_prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut continuation: Option<String> = None;

    loop {
        let response = client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key_prefix)
            .set_continuation_token(continuation.take())
            .send()
            .await
            .map_err(|e| Error::Storage(format!("failed to list s3://{}/{}: {}", bucket, key_prefix, e)))?;

        keys.extend(batch_keys(response.contents().iter().filter_map(|o| o.key())));

        match response.next_continuation_token() {
            Some(token) => continuation = Some(token.to_string()),
            None => break,
        }
    }

    keys.sort();
    Ok(keys)
}

fn batch_keys<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    keys.filter(|key| key.ends_with(".parquet"))
        .map(str::to_string)
        .collect()
}

fn parquet_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let visible = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'));
            visible && path.extension().is_some_and(|ext| ext == "parquet")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Fold one in-memory Parquet object into `latest`.
pub fn scan_bytes(label: &str, body: Bytes, latest: &mut Timestamps) -> Result<usize> {
    scan_reader(label, body, latest)
}

fn scan_reader<R: ChunkReader + 'static>(
    label: &str,
    input: R,
    latest: &mut Timestamps,
) -> Result<usize> {
    let storage_err = |e: parquet::errors::ParquetError| Error::Storage(format!("{}: {}", label, e));

    let builder = ParquetRecordBatchReaderBuilder::try_new(input).map_err(storage_err)?;
    let mask = ProjectionMask::columns(builder.parquet_schema(), [APPID_COLUMN, CREATED_COLUMN]);
    let reader = builder.with_projection(mask).build().map_err(storage_err)?;

    let mut rows = 0;
    for batch in reader {
        let batch = batch.map_err(|e| Error::Storage(format!("{}: {}", label, e)))?;
        let appids = int64_column(&batch, APPID_COLUMN, label)?;
        let created = int64_column(&batch, CREATED_COLUMN, label)?;

        for i in 0..batch.num_rows() {
            if appids.is_null(i) || created.is_null(i) {
                continue;
            }
            let entry = latest
                .entry(appids.value(i).to_string())
                .or_insert(i64::MIN);
            *entry = (*entry).max(created.value(i));
        }
        rows += batch.num_rows();
    }

    if rows == 0 {
        warn!(source = %label, "Batch holds no reviews");
    }
    Ok(rows)
}

fn int64_column<'a>(
    batch: &'a arrow::record_batch::RecordBatch,
    name: &str,
    label: &str,
) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Validation(format!("{}: missing Int64 column {}", label, name)))
}
