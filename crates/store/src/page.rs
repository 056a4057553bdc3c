//! Per-source page cache: one JSON file per URL, each bundling the HTML
//! with the API slice captured by the same fetch.

use crate::error::Result;
use crate::{now_ts, paths};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cached page together with its API slice.
///
/// `html` and `api_data` always originate from the same fetch operation;
/// `fetched_at` is the shared timestamp of that fetch. Entries are
/// superseded by later refreshes, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageData {
    pub url: String,
    pub html: String,
    #[serde(default)]
    pub api_data: Value,
    #[serde(default)]
    pub asset_id: String,
    /// JSON bodies of XHR/fetch responses captured during the page load,
    /// keyed by request path. Older caches stored these as `xhr_responses`
    /// (page store) or `api_responses` (snapshot pages).
    #[serde(default, alias = "xhr_responses", alias = "api_responses")]
    pub aux_responses: HashMap<String, Value>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub fetched_at: f64,
}

fn default_status() -> u16 {
    200
}

impl PageData {
    /// Bundle a freshly fetched page with its API slice under one timestamp.
    pub fn new(url: impl Into<String>, html: impl Into<String>, api_data: Value) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            api_data,
            asset_id: String::new(),
            aux_responses: HashMap::new(),
            status: 200,
            fetched_at: now_ts(),
        }
    }

    pub fn with_asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = asset_id.into();
        self
    }

    pub fn with_aux_responses(mut self, aux: HashMap<String, Value>) -> Self {
        self.aux_responses = aux;
        self
    }

    pub fn is_expired(&self, ttl_seconds: u64) -> bool {
        self.is_expired_at(now_ts(), ttl_seconds)
    }

    pub fn is_expired_at(&self, now: f64, ttl_seconds: u64) -> bool {
        now > self.fetched_at + ttl_seconds as f64
    }
}

/// Durable `(url → PageData)` storage for one source.
///
/// `put` is the only mutator and writes the whole entry atomically
/// (write-to-temp-then-rename), so concurrent readers see either the old
/// or the new entry, never a partial one. Loaded entries are kept in an
/// in-memory read-through cache.
pub struct PageStore {
    source_dir: PathBuf,
    source: String,
    ttl_seconds: u64,
    loaded: Arc<RwLock<HashMap<String, PageData>>>,
}

impl PageStore {
    pub fn new(source_dir: impl AsRef<Path>, source: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            source_dir: source_dir.as_ref().to_path_buf(),
            source: source.into(),
            ttl_seconds,
            loaded: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    fn page_path(&self, url: &str) -> PathBuf {
        paths::page_path(&self.source_dir, url)
    }

    /// Load a page entry, consulting the in-memory cache first.
    pub async fn get(&self, url: &str) -> Option<PageData> {
        if let Some(page) = self.loaded.read().await.get(url) {
            return Some(page.clone());
        }

        let path = self.page_path(url);
        let data = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<PageData>(&data) {
            Ok(page) => {
                self.loaded
                    .write()
                    .await
                    .insert(url.to_string(), page.clone());
                Some(page)
            }
            Err(err) => {
                log::warn!("[{}] failed to load page {url}: {err}", self.source);
                None
            }
        }
    }

    /// Persist a page entry, overwriting any existing entry for that URL.
    pub async fn put(&self, page: PageData) -> Result<()> {
        let path = self.page_path(&page.url);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_string(&page)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.loaded.write().await.insert(page.url.clone(), page);
        Ok(())
    }

    /// Whether a page exists and is inside its TTL.
    pub async fn is_fresh(&self, url: &str, ttl_seconds: u64) -> bool {
        match self.get(url).await {
            Some(page) => !page.is_expired(ttl_seconds),
            None => false,
        }
    }

    /// Subset of `urls` that are missing or expired.
    pub async fn stale_urls(&self, urls: &[String], ttl_seconds: u64) -> Vec<String> {
        let mut stale = Vec::new();
        for url in urls {
            if !self.is_fresh(url, ttl_seconds).await {
                stale.push(url.clone());
            }
        }
        stale
    }

    /// API slice stored with a specific page, if cached.
    pub async fn api_data_for_url(&self, url: &str) -> Option<Value> {
        self.get(url).await.map(|page| page.api_data)
    }

    /// Scan all stored pages and index their API slices by asset id.
    ///
    /// Pages without an asset id or without an API slice are skipped; the
    /// counts of both groups are logged so operators can spot a cache that
    /// needs a forced rebuild.
    pub async fn aggregate_api_data(&self) -> HashMap<String, Value> {
        let mut result = HashMap::new();
        let pages_dir = paths::pages_dir(&self.source_dir);

        let mut entries = match tokio::fs::read_dir(&pages_dir).await {
            Ok(entries) => entries,
            Err(_) => {
                log::debug!("[{}] pages dir does not exist: {}", self.source, pages_dir.display());
                return result;
            }
        };

        let mut with_api = 0usize;
        let mut without_api = 0usize;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(data) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(page) = serde_json::from_str::<PageData>(&data) else {
                log::debug!("[{}] skipping unreadable page {}", self.source, path.display());
                continue;
            };
            if !page.asset_id.is_empty() && !page.api_data.is_null() {
                result.insert(page.asset_id, page.api_data);
                with_api += 1;
            } else {
                without_api += 1;
            }
        }

        if without_api > 0 {
            log::warn!(
                "[{}] {with_api} pages with api_data, {without_api} without; rebuild with a forced refresh",
                self.source
            );
        } else {
            log::debug!("[{}] aggregated api_data from {with_api} pages", self.source);
        }

        result
    }

    /// Number of stored page entries on disk.
    pub async fn page_count(&self) -> usize {
        let pages_dir = paths::pages_dir(&self.source_dir);
        let mut count = 0usize;
        let Ok(mut entries) = tokio::fs::read_dir(&pages_dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> PageStore {
        PageStore::new(temp.path().join("coingecko"), "coingecko", 3600)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);

        let page = PageData::new(
            "https://www.coingecko.com/en/coins/bitcoin",
            "<h1>Bitcoin</h1>",
            json!({"id": "bitcoin", "price": 100000}),
        )
        .with_asset_id("bitcoin");

        store.put(page.clone()).await.expect("put");
        let loaded = store
            .get("https://www.coingecko.com/en/coins/bitcoin")
            .await
            .expect("page");
        assert_eq!(loaded, page);
    }

    #[tokio::test]
    async fn html_and_api_share_one_timestamp() {
        let page = PageData::new("https://x.com/a", "<h1>A</h1>", json!({"id": "a"}));
        // Both halves of the entry carry the single fetch timestamp; there is
        // no API through which they can diverge.
        assert!(page.fetched_at > 0.0);
        let serialized = serde_json::to_value(&page).expect("json");
        assert_eq!(serialized["fetched_at"], json!(page.fetched_at));
    }

    #[tokio::test]
    async fn missing_page_is_none() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        assert!(store.get("https://www.coingecko.com/nope").await.is_none());
    }

    #[tokio::test]
    async fn stale_urls_reports_missing_and_expired() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);

        let mut fresh = PageData::new("https://x.com/fresh", "<p>f</p>", json!({}));
        fresh.fetched_at = now_ts();
        store.put(fresh).await.expect("put fresh");

        let mut expired = PageData::new("https://x.com/old", "<p>o</p>", json!({}));
        expired.fetched_at = now_ts() - 7200.0;
        store.put(expired).await.expect("put expired");

        let urls = vec![
            "https://x.com/fresh".to_string(),
            "https://x.com/old".to_string(),
            "https://x.com/missing".to_string(),
        ];
        let stale = store.stale_urls(&urls, 3600).await;
        assert_eq!(
            stale,
            vec![
                "https://x.com/old".to_string(),
                "https://x.com/missing".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn ttl_boundary_is_exclusive() {
        let mut page = PageData::new("https://x.com/a", "<p>a</p>", json!({}));
        page.fetched_at = 1000.0;
        assert!(!page.is_expired_at(1000.0 + 3600.0 - 1.0, 3600));
        assert!(page.is_expired_at(1000.0 + 3600.0 + 1.0, 3600));
    }

    #[tokio::test]
    async fn aggregate_skips_pages_without_asset_or_api() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);

        store
            .put(
                PageData::new("https://x.com/btc", "<p>b</p>", json!({"price": 1}))
                    .with_asset_id("bitcoin"),
            )
            .await
            .expect("put");
        store
            .put(
                PageData::new("https://x.com/eth", "<p>e</p>", json!({"price": 2}))
                    .with_asset_id("ethereum"),
            )
            .await
            .expect("put");
        // No asset id: skipped.
        store
            .put(PageData::new("https://x.com/none", "<p>n</p>", json!({"price": 3})))
            .await
            .expect("put");
        // Null api data: skipped.
        store
            .put(PageData::new("https://x.com/null", "<p>x</p>", Value::Null).with_asset_id("x"))
            .await
            .expect("put");

        let aggregated = store.aggregate_api_data().await;
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated["bitcoin"], json!({"price": 1}));
        assert_eq!(aggregated["ethereum"], json!({"price": 2}));
    }

    #[tokio::test]
    async fn overwrite_supersedes_previous_entry() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);

        store
            .put(PageData::new("https://x.com/a", "<p>v1</p>", json!({"v": 1})))
            .await
            .expect("put v1");
        store
            .put(PageData::new("https://x.com/a", "<p>v2</p>", json!({"v": 2})))
            .await
            .expect("put v2");

        let page = store.get("https://x.com/a").await.expect("page");
        assert_eq!(page.html, "<p>v2</p>");
        assert_eq!(page.api_data, json!({"v": 2}));
        assert_eq!(store.page_count().await, 1);
    }

    #[tokio::test]
    async fn legacy_xhr_responses_field_is_accepted() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let dir = temp.path().join("coingecko").join("pages");
        tokio::fs::create_dir_all(&dir).await.expect("mkdir");

        let legacy = json!({
            "url": "https://x.com/a",
            "html": "<p>a</p>",
            "api_data": {},
            "asset_id": "a",
            "xhr_responses": {"/api/v1/a": {"ok": true}},
            "status": 200,
            "fetched_at": 1.0,
        });
        tokio::fs::write(
            dir.join(crate::paths::url_to_file_name("https://x.com/a")),
            legacy.to_string(),
        )
        .await
        .expect("write");

        let page = store.get("https://x.com/a").await.expect("page");
        assert_eq!(page.aux_responses["/api/v1/a"], json!({"ok": true}));
    }
}
