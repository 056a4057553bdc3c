use async_trait::async_trait;
use replay_store::{PageData, PageStore, SnapshotStore};
use replay_updater::{
    Browser, BrowserSession, CacheOrchestrator, CapturedPage, RefreshOutcome, RefreshStats,
    Result, SourceFetcher, UpdaterConfig, UpdaterError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct FakeFetcher {
    source: String,
    urls: Vec<String>,
}

impl FakeFetcher {
    fn coingecko() -> Self {
        Self {
            source: "coingecko".to_string(),
            urls: vec![
                "https://www.coingecko.com/en/coins/bitcoin".to_string(),
                "https://www.coingecko.com/en/coins/ethereum".to_string(),
            ],
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    fn source(&self) -> &str {
        &self.source
    }

    fn page_urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn fetch_api_slice(&self, asset_id: &str) -> Result<Value> {
        Ok(json!({"id": asset_id, "price": 100}))
    }
}

/// Counts captures; fails the first `fail_times` calls.
struct FakeBrowser {
    captures: Arc<AtomicUsize>,
    fail_times: AtomicUsize,
}

impl FakeBrowser {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(fail_times: usize) -> Self {
        Self {
            captures: Arc::new(AtomicUsize::new(0)),
            fail_times: AtomicUsize::new(fail_times),
        }
    }
}

struct FakeSession {
    captures: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn capture(&mut self, url: &str) -> Result<CapturedPage> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(UpdaterError::FetchError(format!("net::ERR for {url}")));
        }
        let mut aux = HashMap::new();
        aux.insert("/api/v3/ping".to_string(), json!({"gecko_says": "(V3) ok"}));
        Ok(CapturedPage {
            html: format!("<h1>{url}</h1>"),
            status: 200,
            aux_responses: aux,
        })
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(FakeSession {
            captures: self.captures.clone(),
            failures_left: Arc::new(AtomicUsize::new(
                self.fail_times.swap(0, Ordering::SeqCst),
            )),
        }))
    }
}

fn config(temp: &TempDir) -> UpdaterConfig {
    UpdaterConfig {
        cache_dir: temp.path().to_path_buf(),
        sources: vec!["coingecko".to_string()],
        ttl_seconds: 3600,
        ..UpdaterConfig::default()
    }
}

fn orchestrator(temp: &TempDir, browser: Arc<FakeBrowser>) -> CacheOrchestrator {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut orchestrator = CacheOrchestrator::new(config(temp), browser);
    orchestrator.register(Arc::new(FakeFetcher::coingecko()));
    orchestrator
}

#[tokio::test]
async fn ensure_ready_builds_snapshot_and_page_store() {
    let temp = TempDir::new().expect("tempdir");
    let browser = Arc::new(FakeBrowser::new());
    let orchestrator = orchestrator(&temp, browser.clone());

    let outcomes = orchestrator.ensure_ready(false).await;
    match &outcomes["coingecko"] {
        RefreshOutcome::Refreshed { stats, .. } => assert_eq!(
            *stats,
            RefreshStats {
                updated: 2,
                skipped: 0,
                failed: 0,
            }
        ),
        other => panic!("expected Refreshed, got {other:?}"),
    }
    assert_eq!(browser.captures.load(Ordering::SeqCst), 2);

    // Snapshot is current, carries both pages and the aggregated API blob.
    let snapshots = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let current = snapshots.current().await.expect("current snapshot");
    assert_eq!(current.meta().page_count, 2);
    let api = current.api_data().await.expect("api blob");
    assert_eq!(api["bitcoin"]["price"], json!(100));
    assert_eq!(api["ethereum"]["price"], json!(100));

    // The flat page store holds the same capture.
    let pages = PageStore::new(temp.path().join("coingecko"), "coingecko", 3600);
    let page = pages
        .get("https://www.coingecko.com/en/coins/bitcoin")
        .await
        .expect("page");
    assert_eq!(page.asset_id, "bitcoin");
    assert_eq!(page.api_data, json!({"id": "bitcoin", "price": 100}));
    assert_eq!(page.aux_responses["/api/v3/ping"], json!({"gecko_says": "(V3) ok"}));
}

#[tokio::test]
async fn second_unforced_refresh_performs_no_fetches() {
    let temp = TempDir::new().expect("tempdir");
    let browser = Arc::new(FakeBrowser::new());
    let orchestrator = orchestrator(&temp, browser.clone());

    orchestrator.ensure_ready(false).await;
    let after_first = browser.captures.load(Ordering::SeqCst);

    let outcomes = orchestrator.ensure_ready(false).await;
    assert!(matches!(
        outcomes["coingecko"],
        RefreshOutcome::Fresh { .. }
    ));
    assert_eq!(browser.captures.load(Ordering::SeqCst), after_first);
}

#[tokio::test]
async fn forced_refresh_refetches_every_page() {
    let temp = TempDir::new().expect("tempdir");
    let browser = Arc::new(FakeBrowser::new());
    let orchestrator = orchestrator(&temp, browser.clone());

    orchestrator.ensure_ready(false).await;
    let outcome = orchestrator
        .refresh_source("coingecko", true)
        .await
        .expect("refresh");

    match outcome {
        RefreshOutcome::Refreshed { stats, .. } => {
            assert_eq!(stats.updated, 2);
            assert_eq!(stats.skipped, 0);
        }
        other => panic!("expected Refreshed, got {other:?}"),
    }
    assert_eq!(browser.captures.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fresh_cached_pages_are_reused_without_fetching() {
    let temp = TempDir::new().expect("tempdir");
    let pages = PageStore::new(temp.path().join("coingecko"), "coingecko", 3600);
    pages
        .put(
            PageData::new(
                "https://www.coingecko.com/en/coins/bitcoin",
                "<h1>cached</h1>",
                json!({"id": "bitcoin"}),
            )
            .with_asset_id("bitcoin"),
        )
        .await
        .expect("seed page");

    let browser = Arc::new(FakeBrowser::new());
    let orchestrator = orchestrator(&temp, browser.clone());
    let outcome = orchestrator
        .refresh_source("coingecko", false)
        .await
        .expect("refresh");

    match outcome {
        RefreshOutcome::Refreshed { stats, .. } => {
            assert_eq!(stats.skipped, 1);
            assert_eq!(stats.updated, 1);
        }
        other => panic!("expected Refreshed, got {other:?}"),
    }
    // Only the uncached ethereum page hit the browser.
    assert_eq!(browser.captures.load(Ordering::SeqCst), 1);

    let snapshots = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let current = snapshots.current().await.expect("current");
    let reused = current
        .page("https://www.coingecko.com/en/coins/bitcoin")
        .await
        .expect("reused page");
    assert_eq!(reused.html, "<h1>cached</h1>");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let temp = TempDir::new().expect("tempdir");
    let browser = Arc::new(FakeBrowser::failing(2));
    let orchestrator = orchestrator(&temp, browser.clone());

    let outcome = orchestrator
        .refresh_source("coingecko", false)
        .await
        .expect("refresh");

    match outcome {
        RefreshOutcome::Refreshed { stats, .. } => {
            assert_eq!(stats.updated, 2);
            assert_eq!(stats.failed, 0);
        }
        other => panic!("expected Refreshed, got {other:?}"),
    }
    // First page needed three attempts, second succeeded immediately.
    assert_eq!(browser.captures.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn refresh_fails_when_every_page_fails() {
    let temp = TempDir::new().expect("tempdir");
    let browser = Arc::new(FakeBrowser::failing(usize::MAX));
    let orchestrator = orchestrator(&temp, browser);

    let outcome = orchestrator
        .refresh_source("coingecko", false)
        .await
        .expect("refresh call itself succeeds");
    assert!(outcome.is_failed());

    // The half-built generation was discarded; no snapshot is published.
    let snapshots = SnapshotStore::new(temp.path(), "coingecko", 3600);
    assert!(snapshots.current().await.is_none());
}

#[tokio::test]
async fn unregistered_source_reports_failure() {
    let temp = TempDir::new().expect("tempdir");
    let mut config = config(&temp);
    config.sources.push("stooq".to_string());

    let mut orchestrator = CacheOrchestrator::new(config, Arc::new(FakeBrowser::new()));
    orchestrator.register(Arc::new(FakeFetcher::coingecko()));

    let outcomes = orchestrator.ensure_ready(false).await;
    assert!(matches!(
        outcomes["coingecko"],
        RefreshOutcome::Refreshed { .. }
    ));
    assert!(outcomes["stooq"].is_failed());
}
