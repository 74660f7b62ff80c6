use super::{CheckpointStore, Timestamps};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use ingester_core::config::PostgresConfig;
use ingester_core::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct PostgresCheckpointStore {
    pool: PgPool,
    table: String,
}

impl PostgresCheckpointStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool, config.table.clone()))
    }

    /// `table` must already be validated as a plain SQL identifier.
    pub fn new(pool: PgPool, table: String) -> Self {
        Self { pool, table }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn to_naive(app_id: &str, ts: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::Checkpoint(format!("timestamp {} for {} is out of range", ts, app_id)))
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn load_latest_timestamps(&self) -> Result<Timestamps> {
        let query = format!(
            "SELECT game_id, last_processed_timestamp FROM {} WHERE last_processed_timestamp IS NOT NULL",
            self.table
        );

        let rows: Vec<(String, NaiveDateTime)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(game_id, ts)| (game_id, ts.and_utc().timestamp()))
            .collect())
    }

    #[instrument(skip(self, updates), fields(table = %self.table, count = updates.len()))]
    async fn update_latest_timestamps(&self, updates: &Timestamps) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut game_ids = Vec::with_capacity(updates.len());
        let mut timestamps = Vec::with_capacity(updates.len());
        for (game_id, ts) in updates {
            game_ids.push(game_id.clone());
            timestamps.push(to_naive(game_id, *ts)?);
        }

        let query = format!(
            r#"
            INSERT INTO {} (game_id, last_processed_timestamp)
            SELECT * FROM UNNEST($1::varchar[], $2::timestamp[])
            ON CONFLICT (game_id)
            DO UPDATE SET last_processed_timestamp = EXCLUDED.last_processed_timestamp
            "#,
            self.table
        );

        let result = sqlx::query(&query)
            .bind(game_ids)
            .bind(timestamps)
            .execute(&self.pool)
            .await?;

        debug!(rows = result.rows_affected(), "Upserted checkpoints");
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
