//! Catalog snapshots: the ordered list of apps a run walks.

use crate::model::CatalogItem;
use ingester_core::config::SourceConfig;
use ingester_core::{Error, Result};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GameId {
    Number(u64),
    Text(String),
}

impl GameId {
    fn into_key(self) -> String {
        match self {
            GameId::Number(n) => n.to_string(),
            GameId::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    game_id: GameId,
    #[serde(default)]
    game_name: Option<String>,
}

// Response of GET ISteamApps/GetAppList/v2
#[derive(Debug, Deserialize)]
struct AppListResponse {
    applist: AppList,
}

#[derive(Debug, Deserialize)]
struct AppList {
    #[serde(default)]
    apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    appid: u64,
    #[serde(default)]
    name: String,
}

/// Read a JSON array of `{game_id, game_name}` objects.
#[instrument]
pub async fn load_file(path: &Path) -> Result<Vec<CatalogItem>> {
    let body = tokio::fs::read(path).await?;
    let items = parse_catalog(&body)?;
    info!(items = items.len(), "Loaded catalog file");
    Ok(items)
}

fn parse_catalog(body: &[u8]) -> Result<Vec<CatalogItem>> {
    let entries: Vec<CatalogEntry> = serde_json::from_slice(body)?;
    let total = entries.len();

    let items = dedupe(
        entries
            .into_iter()
            .map(|e| CatalogItem::new(e.game_id.into_key(), clean_name(e.game_name))),
    );

    if items.len() < total {
        warn!(
            dropped = total - items.len(),
            "Catalog contained duplicate or blank ids"
        );
    }
    Ok(items)
}

/// Fetch every app Steam knows about.
#[instrument(skip(config), fields(url = %config.app_list_url))]
pub async fn fetch_app_list(config: &SourceConfig) -> Result<Vec<CatalogItem>> {
    let http = HttpClient::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let response = http.get(&config.app_list_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Internal(format!(
            "app list request failed: HTTP {}",
            status
        )));
    }

    let body = response.bytes().await?;
    let items = parse_app_list(&body)?;
    info!(items = items.len(), "Fetched Steam app list");
    Ok(items)
}

fn parse_app_list(body: &[u8]) -> Result<Vec<CatalogItem>> {
    let response: AppListResponse = serde_json::from_slice(body)?;
    Ok(dedupe(response.applist.apps.into_iter().map(|app| {
        CatalogItem::new(app.appid.to_string(), clean_name(Some(app.name)))
    })))
}

fn clean_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// First occurrence of each id wins; blank ids are dropped.
fn dedupe(items: impl Iterator<Item = CatalogItem>) -> Vec<CatalogItem> {
    let mut seen = HashSet::new();
    items
        .filter(|item| !item.app_id.is_empty() && seen.insert(item.app_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_catalog_accepts_numeric_and_string_ids() {
        let body = br#"[
            {"game_id": 440, "game_name": "Team Fortress 2"},
            {"game_id": "570", "game_name": "  Dota 2 "},
            {"game_id": 730}
        ]"#;

        let items = parse_catalog(body).unwrap();
        assert_eq!(
            items,
            vec![
                CatalogItem::new("440", Some("Team Fortress 2".to_string())),
                CatalogItem::new("570", Some("Dota 2".to_string())),
                CatalogItem::new("730", None),
            ]
        );
    }

    #[test]
    fn test_parse_catalog_drops_duplicates_and_blanks() {
        let body = br#"[
            {"game_id": 440, "game_name": "first"},
            {"game_id": "440", "game_name": "second"},
            {"game_id": "  ", "game_name": "blank"}
        ]"#;

        let items = parse_catalog(body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name.as_deref(), Some("first"));
    }

    #[test]
    fn test_parse_app_list() {
        let body = br#"{"applist": {"apps": [
            {"appid": 10, "name": "Counter-Strike "},
            {"appid": 20, "name": ""},
            {"appid": 10, "name": "Counter-Strike"}
        ]}}"#;

        let items = parse_app_list(body).unwrap();
        assert_eq!(
            items,
            vec![
                CatalogItem::new("10", Some("Counter-Strike".to_string())),
                CatalogItem::new("20", None),
            ]
        );
    }

    #[test]
    fn test_parse_catalog_rejects_non_array() {
        assert!(matches!(
            parse_catalog(br#"{"game_id": 1}"#),
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.json");
        std::fs::write(&path, r#"[{"game_id": 440, "game_name": "TF2"}]"#).unwrap();

        let items = load_file(&path).await.unwrap();
        assert_eq!(items, vec![CatalogItem::new("440", Some("TF2".to_string()))]);
    }
}
