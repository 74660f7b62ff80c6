use super::{CheckpointStore, Timestamps};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use ingester_core::config::FirestoreConfig;
use ingester_core::{Error, Result};
use reqwest::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const TIMESTAMP_FIELD: &str = "latest_timestamp";
const LIST_PAGE_SIZE: u32 = 1000;
// Firestore rejects commits with more writes than this
const MAX_WRITES_PER_COMMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

/// Checkpoints as documents `{collection}/{app_id}` holding a
/// `latest_timestamp` field, over the Firestore REST API.
pub struct FirestoreCheckpointStore {
    http: HttpClient,
    documents_url: String,
    document_prefix: String,
    collection: String,
    auth_token: Option<String>,
}

impl FirestoreCheckpointStore {
    pub fn new(config: &FirestoreConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let database = format!("projects/{}/databases/(default)", config.project);

        Ok(Self {
            http,
            documents_url: format!(
                "{}/v1/{}/documents",
                config.base_url.trim_end_matches('/'),
                database
            ),
            document_prefix: format!("{}/documents/{}", database, config.collection),
            collection: config.collection.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn commit_body(&self, updates: &[(&String, &i64)]) -> Result<Value> {
        let writes = updates
            .iter()
            .map(|(app_id, ts)| -> Result<Value> {
                let mut fields = Map::new();
                fields.insert(TIMESTAMP_FIELD.to_string(), encode_timestamp(app_id, **ts)?);
                Ok(json!({
                    "update": {
                        "name": format!("{}/{}", self.document_prefix, app_id),
                        "fields": fields,
                    },
                    "updateMask": { "fieldPaths": [TIMESTAMP_FIELD] },
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({ "writes": writes }))
    }
}

fn encode_timestamp(app_id: &str, ts: i64) -> Result<Value> {
    let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
        Error::Checkpoint(format!("timestamp {} for {} is out of range", ts, app_id))
    })?;
    Ok(json!({ "timestampValue": dt.to_rfc3339_opts(SecondsFormat::Secs, true) }))
}

fn decode_timestamp(value: &Value) -> Option<i64> {
    if let Some(text) = value.get("timestampValue").and_then(Value::as_str) {
        return DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.timestamp());
    }
    // Older documents stored plain epoch seconds
    value
        .get("integerValue")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl CheckpointStore for FirestoreCheckpointStore {
    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn load_latest_timestamps(&self) -> Result<Timestamps> {
        let url = format!("{}/{}", self.documents_url, self.collection);
        let mut out = Timestamps::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = self.authorized(request).send().await?;
            if !response.status().is_success() {
                return Err(Error::Checkpoint(format!(
                    "listing {} failed with HTTP {}",
                    self.collection,
                    response.status()
                )));
            }

            let page: ListDocumentsResponse = response.json().await?;
            for doc in page.documents {
                if let Some(ts) = doc.fields.get(TIMESTAMP_FIELD).and_then(decode_timestamp) {
                    out.insert(document_id(&doc.name).to_string(), ts);
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(out)
    }

    #[instrument(skip(self, updates), fields(collection = %self.collection, count = updates.len()))]
    async fn update_latest_timestamps(&self, updates: &Timestamps) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let url = format!("{}:commit", self.documents_url);
        let entries: Vec<(&String, &i64)> = updates.iter().collect();

        for chunk in entries.chunks(MAX_WRITES_PER_COMMIT) {
            let body = self.commit_body(chunk)?;
            let response = self
                .authorized(self.http.post(&url).json(&body))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Checkpoint(format!(
                    "commit to {} failed with HTTP {}: {}",
                    self.collection, status, text
                )));
            }

            debug!(writes = chunk.len(), "Committed checkpoint batch");
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "firestore"
    }
}
