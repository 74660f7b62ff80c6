use super::ReviewSource;
use crate::model::{ReviewPage, ReviewRecord, PAGE_SIZE};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use ingester_core::config::SourceConfig;
use ingester_core::{Error, Result};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

// Response of GET /appreviews/{appid}?json=1
#[derive(Debug, Deserialize)]
struct ReviewsResponse {
    success: i64,
    #[serde(default)]
    query_summary: Option<QuerySummary>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    reviews: Vec<RawReview>,
}

#[derive(Debug, Deserialize)]
struct QuerySummary {
    #[serde(default)]
    total_reviews: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    recommendationid: Numeric,
    author: RawAuthor,
    #[serde(default)]
    language: String,
    #[serde(default)]
    review: String,
    timestamp_created: i64,
    #[serde(default)]
    timestamp_updated: Option<i64>,
    #[serde(default)]
    voted_up: bool,
    #[serde(default)]
    votes_up: Option<Numeric>,
    #[serde(default)]
    votes_funny: Option<Numeric>,
    #[serde(default)]
    weighted_vote_score: Option<Numeric>,
    #[serde(default)]
    comment_count: Option<Numeric>,
    #[serde(default)]
    steam_purchase: bool,
    #[serde(default)]
    received_for_free: bool,
    #[serde(default)]
    written_during_early_access: bool,
    #[serde(default)]
    primarily_steam_deck: bool,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    steamid: Numeric,
    #[serde(default)]
    num_games_owned: Option<Numeric>,
    #[serde(default)]
    num_reviews: Option<Numeric>,
    #[serde(default)]
    playtime_forever: Option<Numeric>,
    #[serde(default)]
    playtime_last_two_weeks: Option<Numeric>,
    #[serde(default)]
    playtime_at_review: Option<Numeric>,
    #[serde(default)]
    last_played: Option<Numeric>,
}

/// Steam mixes JSON numbers and numeric strings (ids, vote scores).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Int(v) => Some(*v),
            Numeric::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Numeric::Float(_) => None,
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(v) => Some(*v as f64),
            Numeric::Float(v) => Some(*v),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn opt_i64(value: &Option<Numeric>) -> Option<i64> {
    value.as_ref().and_then(Numeric::as_i64)
}

pub struct SteamReviewClient {
    http: HttpClient,
    base_url: String,
    language: String,
    filter: String,
}

impl SteamReviewClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("review-ingester/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            filter: config.filter.clone(),
        })
    }
}

fn parse_app_id(app_id: &str) -> Result<i64> {
    app_id
        .parse()
        .map_err(|_| Error::source_error(app_id, "app id is not numeric"))
}

fn parse_reviews_response(
    app_id: &str,
    response: ReviewsResponse,
    scrape_date: NaiveDate,
) -> Result<ReviewPage> {
    if response.success != 1 {
        return Err(Error::source_error(
            app_id,
            format!("API reported success={}", response.success),
        ));
    }

    let appid = parse_app_id(app_id)?;

    let reviews = response
        .reviews
        .into_iter()
        .map(|raw| to_record(appid, raw, scrape_date))
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(|details| Error::source_error(app_id, details))?;

    Ok(ReviewPage {
        reviews,
        cursor: response.cursor.filter(|c| !c.is_empty()),
        total_reviews: response.query_summary.and_then(|s| s.total_reviews),
    })
}

fn to_record(
    appid: i64,
    raw: RawReview,
    scrape_date: NaiveDate,
) -> std::result::Result<ReviewRecord, String> {
    let rec_id = raw
        .recommendationid
        .as_i64()
        .ok_or_else(|| format!("invalid recommendationid: {:?}", raw.recommendationid))?;
    let author_id = raw
        .author
        .steamid
        .as_i64()
        .ok_or_else(|| format!("invalid author steamid on review {}", rec_id))?;

    Ok(ReviewRecord {
        rec_id,
        author_id,
        appid,
        playtime_forever: opt_i64(&raw.author.playtime_forever),
        playtime_last_two_weeks: opt_i64(&raw.author.playtime_last_two_weeks),
        playtime_at_review: opt_i64(&raw.author.playtime_at_review),
        num_games_owned: opt_i64(&raw.author.num_games_owned),
        num_reviews: opt_i64(&raw.author.num_reviews),
        last_played: opt_i64(&raw.author.last_played),
        language: raw.language,
        review: raw.review,
        timestamp_created: raw.timestamp_created,
        timestamp_updated: raw.timestamp_updated.unwrap_or(raw.timestamp_created),
        voted_up: raw.voted_up,
        votes_up: opt_i64(&raw.votes_up).unwrap_or(0),
        votes_funny: opt_i64(&raw.votes_funny).unwrap_or(0),
        weighted_vote_score: raw
            .weighted_vote_score
            .as_ref()
            .and_then(Numeric::as_f64)
            .unwrap_or(0.0),
        comment_count: opt_i64(&raw.comment_count).unwrap_or(0),
        steam_purchase: raw.steam_purchase,
        received_for_free: raw.received_for_free,
        written_during_early_access: raw.written_during_early_access,
        primarily_steam_deck: raw.primarily_steam_deck,
        scrape_date,
    })
}

#[async_trait]
impl ReviewSource for SteamReviewClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, app_id: &str, cursor: &str) -> Result<ReviewPage> {
        parse_app_id(app_id)?;
        let url = format!("{}/appreviews/{}", self.base_url, app_id);
        let page_size = PAGE_SIZE.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[
                ("json", "1"),
                ("filter", self.filter.as_str()),
                ("language", self.language.as_str()),
                ("cursor", cursor),
                ("num_per_page", page_size.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::source_error(
                app_id,
                format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            ));
        }

        let payload: ReviewsResponse = response
            .json()
            .await
            .map_err(|e| Error::source_error(app_id, format!("malformed payload: {}", e)))?;

        let page = parse_reviews_response(app_id, payload, Utc::now().date_naive())?;

        debug!(
            app_id,
            reviews = page.reviews.len(),
            total_reviews = ?page.total_reviews,
            "Fetched review page"
        );

        Ok(page)
    }

    fn source_id(&self) -> &str {
        "steam"
    }
}
