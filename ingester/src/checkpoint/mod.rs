pub mod firestore;
pub mod postgres;

use async_trait::async_trait;
use ingester_core::config::{CheckpointBackend, CheckpointConfig};
use ingester_core::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-item high-water marks: app id to `timestamp_created` (epoch seconds)
/// of the newest ingested review.
pub type Timestamps = HashMap<String, i64>;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read every checkpoint in one round-trip.
    async fn load_latest_timestamps(&self) -> Result<Timestamps>;

    /// Upsert the given checkpoints, last write wins. An empty map is a no-op.
    async fn update_latest_timestamps(&self, updates: &Timestamps) -> Result<()>;

    fn name(&self) -> &str;
}

pub async fn connect(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match config.backend {
        CheckpointBackend::Postgres => {
            Arc::new(postgres::PostgresCheckpointStore::connect(&config.postgres).await?)
        }
        CheckpointBackend::Firestore => {
            Arc::new(firestore::FirestoreCheckpointStore::new(&config.firestore)?)
        }
    };
    Ok(store)
}

pub use postgres::PostgresCheckpointStore;
