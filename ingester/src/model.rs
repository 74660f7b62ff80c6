use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Reviews per page requested from the source.
pub const PAGE_SIZE: u64 = 100;

/// Cursor value that starts a review stream from the newest review.
pub const START_CURSOR: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub app_id: String,
    pub name: Option<String>,
}

impl CatalogItem {
    pub fn new(app_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            app_id: app_id.into(),
            name,
        }
    }
}

impl std::fmt::Display for CatalogItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.app_id, name),
            None => write!(f, "{}", self.app_id),
        }
    }
}

/// One normalized user review.
///
/// `timestamp_created` (epoch seconds) is the only field used to decide
/// whether a review is new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub rec_id: i64,
    pub author_id: i64,
    pub appid: i64,
    pub playtime_forever: Option<i64>,
    pub playtime_last_two_weeks: Option<i64>,
    pub playtime_at_review: Option<i64>,
    pub num_games_owned: Option<i64>,
    pub num_reviews: Option<i64>,
    pub last_played: Option<i64>,
    pub language: String,
    pub review: String,
    pub timestamp_created: i64,
    pub timestamp_updated: i64,
    pub voted_up: bool,
    pub votes_up: i64,
    pub votes_funny: i64,
    pub weighted_vote_score: f64,
    pub comment_count: i64,
    pub steam_purchase: bool,
    pub received_for_free: bool,
    pub written_during_early_access: bool,
    pub primarily_steam_deck: bool,
    pub scrape_date: NaiveDate,
}

/// One page of reviews in descending `timestamp_created` order.
#[derive(Debug, Clone, Default)]
pub struct ReviewPage {
    pub reviews: Vec<ReviewRecord>,
    pub cursor: Option<String>,
    pub total_reviews: Option<u64>,
}

impl ReviewPage {
    pub fn newest_timestamp(&self) -> Option<i64> {
        self.reviews.first().map(|r| r.timestamp_created)
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.reviews.last().map(|r| r.timestamp_created)
    }

    /// Pages the whole stream spans according to the total-count hint.
    pub fn expected_pages(&self) -> Option<u64> {
        self.total_reviews.map(|total| total.div_ceil(PAGE_SIZE))
    }
}

/// What processing one catalog item produced, before it is committed to the
/// run's buffer and checkpoint cache.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// The source has no reviews for the item.
    Empty,
    /// Newest review is not newer than the checkpoint.
    Unchanged { newest: i64 },
    Fresh {
        newest: i64,
        records: Vec<ReviewRecord>,
        pages: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub items_total: usize,
    pub items_empty: usize,
    pub items_skipped: usize,
    pub items_fetched: usize,
    pub items_failed: usize,
    pub records_appended: usize,
    pub batches_written: usize,
    pub records_written: usize,
    /// Records still buffered when the run ended because the final write failed.
    pub records_unpersisted: usize,
    pub interrupted: bool,
}
