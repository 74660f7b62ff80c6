use crate::batch::BatchBuffer;
use crate::cache::TimestampCache;
use crate::checkpoint::CheckpointStore;
use crate::model::{CatalogItem, ItemOutcome, ReviewPage, ReviewRecord, RunSummary, START_CURSOR};
use crate::sink::{BatchWriter, DestinationNamer};
use crate::source::ReviewSource;
use chrono::{NaiveDate, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use ingester_core::backoff::{retry_with_backoff, RetryPolicy};
use ingester_core::Result;
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Per-run state: the checkpoint cache, the pending batch and counters.
/// Built at run start and passed through every step of the run.
pub struct RunContext {
    cache: TimestampCache,
    buffer: BatchBuffer,
    namer: DestinationNamer,
    batch_index: u32,
    summary: RunSummary,
}

#[cfg(test)]
impl RunContext {
    pub fn cache(&self) -> &TimestampCache {
        &self.cache
    }

    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }
}

pub struct Pipeline {
    source: Arc<dyn ReviewSource>,
    writer: Arc<dyn BatchWriter>,
    retry: RetryPolicy,
    flush_threshold: usize,
    file_prefix: String,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ReviewSource>,
        writer: Arc<dyn BatchWriter>,
        config: &ingester_core::Config,
    ) -> Self {
        let rate_limiter = Quota::with_period(Duration::from_millis(
            config.source.inter_call_delay_ms,
        ))
        .map(RateLimiter::direct);

        Self {
            source,
            writer,
            retry: RetryPolicy::from(&config.ingest),
            flush_threshold: config.ingest.flush_threshold,
            file_prefix: config.output.file_prefix.clone(),
            rate_limiter,
        }
    }

    /// Load checkpoints and set up an empty batch. A store that cannot be
    /// read fails the whole run here, before anything is fetched.
    pub async fn start_run(
        &self,
        store: Arc<dyn CheckpointStore>,
        run_date: NaiveDate,
    ) -> Result<RunContext> {
        let cache = TimestampCache::load(store).await?;
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        info!(
            run_date = %run_date,
            run_id = %run_id,
            checkpoints = cache.len(),
            source = self.source.source_id(),
            flush_threshold = self.flush_threshold,
            "Starting ingestion run"
        );

        Ok(RunContext {
            cache,
            buffer: BatchBuffer::new(self.flush_threshold),
            namer: DestinationNamer::new(self.file_prefix.clone(), run_date, run_id),
            batch_index: 0,
            summary: RunSummary::default(),
        })
    }

    #[instrument(skip_all, fields(items = catalog.len()))]
    pub async fn run(
        &self,
        store: Arc<dyn CheckpointStore>,
        catalog: &[CatalogItem],
        shutdown: mpsc::Receiver<()>,
    ) -> Result<RunSummary> {
        let mut ctx = self.start_run(store, Utc::now().date_naive()).await?;
        self.process_catalog(&mut ctx, catalog, shutdown).await;
        Ok(self.finish(ctx).await)
    }

    /// Walk the catalog in order. Errors stay inside the item that raised
    /// them; a shutdown signal stops the walk without losing buffered records.
    pub async fn process_catalog(
        &self,
        ctx: &mut RunContext,
        catalog: &[CatalogItem],
        mut shutdown: mpsc::Receiver<()>,
    ) {
        let total = catalog.len();
        ctx.summary.items_total += total;

        for (position, item) in catalog.iter().enumerate() {
            let cached = ctx.cache.get(&item.app_id);
            info!(
                app = %item,
                position = position + 1,
                total,
                cached = ?cached,
                "Processing app"
            );

            let result = tokio::select! {
                biased;

                Some(()) = shutdown.recv() => {
                    warn!(app = %item, "Shutdown requested, abandoning current app");
                    ctx.summary.interrupted = true;
                    break;
                }

                result = self.process_item(item, cached) => result,
            };

            match result {
                Ok(outcome) => self.commit(ctx, item, outcome),
                Err(e) => {
                    error!(app = %item, error = %e, "Failed to process app");
                    ctx.summary.items_failed += 1;
                    counter!("ingester_items_total", "outcome" => "failed").increment(1);
                    self.flush_durable_checkpoints(ctx).await;
                }
            }

            if ctx.buffer.is_full() {
                self.flush_batch(ctx).await;
            }
        }
    }

    /// Fetch everything new for one item without touching run state.
    #[instrument(skip(self, item), fields(app_id = %item.app_id))]
    pub async fn process_item(
        &self,
        item: &CatalogItem,
        cached: Option<i64>,
    ) -> Result<ItemOutcome> {
        let first = self.fetch_page(&item.app_id, START_CURSOR).await?;

        let Some(newest) = first.newest_timestamp() else {
            return Ok(ItemOutcome::Empty);
        };

        if cached.is_some_and(|checkpoint| newest <= checkpoint) {
            return Ok(ItemOutcome::Unchanged { newest });
        }

        let expected_pages = first.expected_pages();
        let mut reached_checkpoint = reaches_checkpoint(&first, cached);
        let ReviewPage {
            reviews, cursor, ..
        } = first;

        let mut records = newer_than(reviews, cached);
        let mut cursor = cursor;
        let mut pages: u32 = 1;

        while !reached_checkpoint {
            if expected_pages.is_some_and(|expected| u64::from(pages) >= expected) {
                break;
            }
            let Some(current) = cursor.take() else {
                break;
            };

            debug!(page = pages + 1, expected = ?expected_pages, "Fetching next page");
            let page = self.fetch_page(&item.app_id, &current).await?;
            pages += 1;

            if page.reviews.is_empty() {
                break;
            }

            reached_checkpoint = reaches_checkpoint(&page, cached);
            let repeated = page.cursor.as_deref() == Some(current.as_str());
            records.extend(newer_than(page.reviews, cached));

            if repeated {
                break;
            }
            cursor = page.cursor;
        }

        if reached_checkpoint {
            debug!(pages, "Stopped pagination at known history");
        }

        Ok(ItemOutcome::Fresh {
            newest,
            records,
            pages,
        })
    }

    /// Every attempt, retries included, waits for the inter-call limiter.
    async fn fetch_page(&self, app_id: &str, cursor: &str) -> Result<ReviewPage> {
        let source = &self.source;
        let limiter = self.rate_limiter.as_ref();

        let start = Instant::now();
        let page = retry_with_backoff(
            move || async move {
                if let Some(limiter) = limiter {
                    limiter.until_ready().await;
                }
                source.fetch_page(app_id, cursor).await
            },
            &self.retry,
            "fetch_reviews",
        )
        .await?;

        histogram!("ingester_fetch_duration_ms").record(start.elapsed().as_millis() as f64);
        Ok(page)
    }

    fn commit(&self, ctx: &mut RunContext, item: &CatalogItem, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Empty => {
                warn!(app = %item, "No reviews found");
                ctx.summary.items_empty += 1;
                counter!("ingester_items_total", "outcome" => "empty").increment(1);
            }
            ItemOutcome::Unchanged { newest } => {
                info!(app = %item, newest, "Skipping app - no new reviews");
                ctx.summary.items_skipped += 1;
                counter!("ingester_items_total", "outcome" => "skipped").increment(1);
            }
            ItemOutcome::Fresh {
                newest,
                records,
                pages,
            } => {
                let added = records.len();
                ctx.buffer.extend(records);
                ctx.cache.set(&item.app_id, newest);

                ctx.summary.items_fetched += 1;
                ctx.summary.records_appended += added;
                counter!("ingester_items_total", "outcome" => "fetched").increment(1);
                counter!("ingester_records_appended_total").increment(added as u64);
                gauge!("ingester_buffered_records").set(ctx.buffer.len() as f64);

                info!(
                    app = %item,
                    added,
                    pages,
                    newest,
                    buffered = ctx.buffer.len(),
                    "Added reviews"
                );
            }
        }
    }

    /// Write the buffer, then flush checkpoints. Returns `false` when the
    /// write failed; the buffer and pending checkpoints are then untouched.
    async fn flush_batch(&self, ctx: &mut RunContext) -> bool {
        if !ctx.buffer.is_empty() {
            let destination = ctx.namer.name(ctx.batch_index);
            let count = ctx.buffer.len();
            info!(
                batch = ctx.batch_index,
                records = count,
                destination = %destination,
                "Writing batch"
            );

            let records: &[ReviewRecord] = ctx.buffer.records();
            let result = retry_with_backoff(
                || self.writer.write(records, &destination),
                &self.retry,
                "write_batch",
            )
            .await;

            match result {
                Ok(location) => {
                    info!(
                        batch = ctx.batch_index,
                        records = count,
                        location = %location,
                        writer = self.writer.name(),
                        "Batch written"
                    );
                    ctx.buffer.clear();
                    ctx.batch_index += 1;
                    ctx.summary.batches_written += 1;
                    ctx.summary.records_written += count;
                    counter!("ingester_batches_written_total").increment(1);
                    counter!("ingester_records_written_total").increment(count as u64);
                    gauge!("ingester_buffered_records").set(0.0);
                }
                Err(e) => {
                    error!(
                        batch = ctx.batch_index,
                        records = count,
                        error = %e,
                        "Batch write failed, keeping records buffered"
                    );
                    counter!("ingester_batch_write_failures_total").increment(1);
                    return false;
                }
            }
        }

        // Records are durable from here on, so their checkpoints may follow
        if ctx.cache.flush().await.is_err() {
            counter!("ingester_checkpoint_flush_failures_total").increment(1);
        }
        true
    }

    /// Persist pending checkpoints only when none of them refer to records
    /// still sitting in the buffer.
    async fn flush_durable_checkpoints(&self, ctx: &mut RunContext) {
        if ctx.cache.pending_count() == 0 {
            return;
        }

        if ctx.buffer.is_empty() {
            if ctx.cache.flush().await.is_err() {
                counter!("ingester_checkpoint_flush_failures_total").increment(1);
            }
        } else {
            debug!(
                pending = ctx.cache.pending_count(),
                buffered = ctx.buffer.len(),
                "Deferring checkpoint flush until buffered records are written"
            );
        }
    }

    /// Final flush of records and checkpoints.
    pub async fn finish(&self, mut ctx: RunContext) -> RunSummary {
        if !self.flush_batch(&mut ctx).await {
            ctx.summary.records_unpersisted = ctx.buffer.len();
            error!(
                records = ctx.buffer.len(),
                pending_checkpoints = ctx.cache.pending_count(),
                "Final batch could not be written; checkpoints left unchanged so the next run re-fetches"
            );
        }

        let summary = ctx.summary;
        info!(
            items = summary.items_total,
            fetched = summary.items_fetched,
            skipped = summary.items_skipped,
            empty = summary.items_empty,
            failed = summary.items_failed,
            records = summary.records_appended,
            batches = summary.batches_written,
            interrupted = summary.interrupted,
            "Ingestion run finished"
        );
        summary
    }
}

/// Whether a page reaches history the checkpoint already covers.
fn reaches_checkpoint(page: &ReviewPage, cached: Option<i64>) -> bool {
    match (page.oldest_timestamp(), cached) {
        (Some(oldest), Some(checkpoint)) => oldest <= checkpoint,
        _ => false,
    }
}

/// A review is new only if it was created strictly after the checkpoint.
fn newer_than(reviews: Vec<ReviewRecord>, cached: Option<i64>) -> Vec<ReviewRecord> {
    match cached {
        Some(checkpoint) => reviews
            .into_iter()
            .filter(|r| r.timestamp_created > checkpoint)
            .collect(),
        None => reviews,
    }
}
