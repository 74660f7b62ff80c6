//! In-memory stand-ins for the review API, checkpoint store and batch writer.

use crate::checkpoint::{CheckpointStore, Timestamps};
use crate::model::{ReviewPage, ReviewRecord, START_CURSOR};
use crate::sink::BatchWriter;
use crate::source::ReviewSource;
use async_trait::async_trait;
use chrono::NaiveDate;
use ingester_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn review(app_id: &str, rec_id: i64, timestamp_created: i64) -> ReviewRecord {
    ReviewRecord {
        rec_id,
        author_id: 76561198000000000 + rec_id,
        appid: app_id.parse().unwrap(),
        playtime_forever: Some(600),
        playtime_last_two_weeks: Some(0),
        playtime_at_review: Some(300),
        num_games_owned: Some(12),
        num_reviews: Some(1),
        last_played: Some(timestamp_created),
        language: "english".to_string(),
        review: format!("review {}", rec_id),
        timestamp_created,
        timestamp_updated: timestamp_created,
        voted_up: true,
        votes_up: 0,
        votes_funny: 0,
        weighted_vote_score: 0.5,
        comment_count: 0,
        steam_purchase: true,
        received_for_free: false,
        written_during_early_access: false,
        primarily_steam_deck: false,
        scrape_date: NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
    }
}

/// Reviews for `app_id` with the given creation timestamps, ids counting up.
pub fn reviews(app_id: &str, timestamps: &[i64]) -> Vec<ReviewRecord> {
    timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| review(app_id, *ts * 1000 + i as i64, *ts))
        .collect()
}

struct ScriptedApp {
    pages: Vec<Vec<ReviewRecord>>,
    total_reviews: u64,
    failures_left: usize,
}

/// Serves pre-split pages. Page `n` is addressed by cursor `"*"` for the
/// first page and `"page-n"` afterwards; the last page repeats its own cursor
/// the way the live API does.
#[derive(Default)]
pub struct ScriptedSource {
    apps: Mutex<HashMap<String, ScriptedApp>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedSource {
    pub fn with_app(self, app_id: &str, pages: Vec<Vec<ReviewRecord>>, total_reviews: u64) -> Self {
        self.apps.lock().unwrap().insert(
            app_id.to_string(),
            ScriptedApp {
                pages,
                total_reviews,
                failures_left: 0,
            },
        );
        self
    }

    /// Make the next `count` calls for `app_id` fail.
    pub fn fail_next(&self, app_id: &str, count: usize) {
        if let Some(app) = self.apps.lock().unwrap().get_mut(app_id) {
            app.failures_left = count;
        }
    }

    /// Append fresh reviews on top of an app's stream.
    pub fn prepend(&self, app_id: &str, newer: Vec<ReviewRecord>) {
        let mut apps = self.apps.lock().unwrap();
        let app = apps.get_mut(app_id).unwrap();
        app.total_reviews += newer.len() as u64;
        app.pages.insert(0, newer);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, app_id: &str) -> usize {
        self.calls().iter().filter(|(id, _)| id == app_id).count()
    }
}

#[async_trait]
impl ReviewSource for ScriptedSource {
    async fn fetch_page(&self, app_id: &str, cursor: &str) -> Result<ReviewPage> {
        self.calls
            .lock()
            .unwrap()
            .push((app_id.to_string(), cursor.to_string()));

        let mut apps = self.apps.lock().unwrap();
        let Some(app) = apps.get_mut(app_id) else {
            return Ok(ReviewPage {
                reviews: Vec::new(),
                cursor: Some(START_CURSOR.to_string()),
                total_reviews: Some(0),
            });
        };

        if app.failures_left > 0 {
            app.failures_left -= 1;
            return Err(Error::source_error(app_id, "HTTP 429 Too Many Requests"));
        }

        let index = if cursor == START_CURSOR {
            0
        } else {
            cursor
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::source_error(app_id, format!("unknown cursor {}", cursor)))?
        };

        let reviews = app.pages.get(index).cloned().unwrap_or_default();
        let next = if index + 1 < app.pages.len() {
            format!("page-{}", index + 1)
        } else {
            cursor.to_string()
        };

        Ok(ReviewPage {
            reviews,
            cursor: Some(next),
            total_reviews: (index == 0).then_some(app.total_reviews),
        })
    }

    fn source_id(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Timestamps>,
    fail_loads: AtomicBool,
    fail_updates: AtomicBool,
    update_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap()
            .extend(entries.into_iter().map(|(k, v)| (k.to_string(), v)));
        store
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Timestamps {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_latest_timestamps(&self) -> Result<Timestamps> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::Checkpoint("connection refused".into()));
        }
        Ok(self.snapshot())
    }

    async fn update_latest_timestamps(&self, updates: &Timestamps) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::Checkpoint("connection reset".into()));
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .extend(updates.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
pub struct MemoryWriter {
    written: Mutex<Vec<(String, Vec<ReviewRecord>)>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryWriter {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<(String, Vec<ReviewRecord>)> {
        self.written.lock().unwrap().clone()
    }

    pub fn all_records(&self) -> Vec<ReviewRecord> {
        self.batches().into_iter().flat_map(|(_, records)| records).collect()
    }
}

#[async_trait]
impl BatchWriter for MemoryWriter {
    async fn write(&self, records: &[ReviewRecord], destination: &str) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Storage("bucket unavailable".into()));
        }
        self.written
            .lock()
            .unwrap()
            .push((destination.to_string(), records.to_vec()));
        Ok(format!("memory://{}", destination))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
