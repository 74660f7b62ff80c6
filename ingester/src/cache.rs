use crate::checkpoint::{CheckpointStore, Timestamps};
use ingester_core::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// In-memory mirror of the checkpoint store for one run.
///
/// Reads never touch the store. Writes are kept as pending deltas until
/// [`TimestampCache::flush`] pushes them in one batched upsert.
pub struct TimestampCache {
    store: Arc<dyn CheckpointStore>,
    entries: Timestamps,
    pending: Timestamps,
}

impl TimestampCache {
    /// Bulk-load every checkpoint. Failing here must abort the run: an empty
    /// cache would mean "fetch all history" for every item.
    #[instrument(skip(store), fields(store = store.name()))]
    pub async fn load(store: Arc<dyn CheckpointStore>) -> Result<Self> {
        info!("Loading latest timestamps");
        let entries = store.load_latest_timestamps().await?;
        info!(count = entries.len(), "Loaded latest timestamps");

        Ok(Self {
            store,
            entries,
            pending: Timestamps::new(),
        })
    }

    pub fn get(&self, app_id: &str) -> Option<i64> {
        self.entries.get(app_id).copied()
    }

    /// Raise the checkpoint for `app_id` to `timestamp`. Lower values are
    /// ignored. Returns whether the entry changed.
    pub fn set(&mut self, app_id: &str, timestamp: i64) -> bool {
        if let Some(current) = self.get(app_id) {
            if timestamp <= current {
                debug!(app_id, current, timestamp, "Ignoring non-advancing checkpoint");
                return false;
            }
        }

        self.entries.insert(app_id.to_string(), timestamp);
        self.pending.insert(app_id.to_string(), timestamp);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Push pending entries to the store. On failure they stay pending so the
    /// next flush retries them.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let count = self.pending.len();
        info!(count, store = self.store.name(), "Flushing timestamp updates");

        match self.store.update_latest_timestamps(&self.pending).await {
            Ok(()) => {
                self.pending.clear();
                info!(count, "Timestamp updates flushed");
                Ok(count)
            }
            Err(e) => {
                warn!(count, error = %e, "Timestamp flush failed, keeping updates pending");
                Err(e)
            }
        }
    }
}
