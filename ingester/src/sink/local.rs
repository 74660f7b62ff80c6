use super::BatchWriter;
use crate::model::ReviewRecord;
use async_trait::async_trait;
use ingester_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Writes batches into a directory. Data goes to a hidden temp file first
/// and is renamed into place once synced.
pub struct LocalBatchWriter {
    directory: PathBuf,
}

impl LocalBatchWriter {
    pub async fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }
}

#[async_trait]
impl BatchWriter for LocalBatchWriter {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn write(&self, records: &[ReviewRecord], destination: &str) -> Result<String> {
        if destination.contains('/') || destination.starts_with('.') {
            return Err(Error::Storage(format!("invalid destination name: {}", destination)));
        }

        let body = super::encoding::encode(records)?;
        let target = self.directory.join(destination);
        let temp = self.directory.join(format!(".{}.tmp", destination));

        let result = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await
        }
        .await;

        // No partial temp file survives a failed write
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(path = %target.display(), bytes = body.len(), "Wrote batch");
        Ok(target.display().to_string())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::review;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_writes_parquet_file() {
        let dir = tempdir().unwrap();
        let writer = LocalBatchWriter::new(dir.path()).await.unwrap();

        let location = writer
            .write(&[review("440", 1, 50)], "steam_reviews_2025-08-10_x_0.parquet")
            .await
            .unwrap();

        let bytes = std::fs::read(&location).unwrap();
        assert_eq!(&bytes[0..4], b"PAR1");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("raw").join("reviews");
        LocalBatchWriter::new(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let dir = tempdir().unwrap();
        let writer = LocalBatchWriter::new(dir.path()).await.unwrap();
        // A directory at the target path makes the final rename fail
        std::fs::create_dir(dir.path().join("taken.parquet")).unwrap();
        std::fs::write(dir.path().join("taken.parquet").join("keep"), b"x").unwrap();

        let result = writer.write(&[review("440", 1, 50)], "taken.parquet").await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!dir.path().join(".taken.parquet.tmp").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_destination() {
        let dir = tempdir().unwrap();
        let writer = LocalBatchWriter::new(dir.path()).await.unwrap();
        let result = writer.write(&[review("440", 1, 50)], "../escape.parquet").await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
