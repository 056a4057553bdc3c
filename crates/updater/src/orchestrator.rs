//! Drives snapshot refreshes across sources.
//!
//! Sources refresh concurrently, each on its own task; pages within one
//! source are fetched strictly sequentially through a single browser
//! session. Every captured page lands in two places with one shared
//! timestamp: the flat page store and the snapshot generation being built.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::fetch::{Browser, BrowserSession, SourceFetcher};
use async_trait::async_trait;
use replay_store::{
    PageData, PageStore, Result as StoreResult, SnapshotFetch, SnapshotStore, SourceSnapshot,
    StoreError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MAX_PAGE_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Page-level counters for one source refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Pages fetched from the live site.
    pub updated: usize,
    /// Pages reused from the page store because they were inside their TTL.
    pub skipped: usize,
    /// Pages that failed all fetch attempts.
    pub failed: usize,
}

/// What a refresh did for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The current snapshot was inside its TTL; nothing was fetched.
    Fresh { snapshot_id: String },
    /// A new snapshot was built and activated.
    Refreshed {
        snapshot_id: String,
        stats: RefreshStats,
    },
    /// The refresh failed; the previously-current snapshot (if any)
    /// remains authoritative.
    Failed { reason: String },
}

impl RefreshOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Refreshes the snapshots of all configured sources.
pub struct CacheOrchestrator {
    config: UpdaterConfig,
    browser: Arc<dyn Browser>,
    fetchers: HashMap<String, Arc<dyn SourceFetcher>>,
}

impl CacheOrchestrator {
    pub fn new(config: UpdaterConfig, browser: Arc<dyn Browser>) -> Self {
        Self {
            config,
            browser,
            fetchers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Register the data provider for one source.
    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(fetcher.source().to_string(), fetcher);
    }

    /// Refresh every configured source, concurrently. Sources without a
    /// registered fetcher report [`RefreshOutcome::Failed`]; one source
    /// failing never aborts the others.
    pub async fn ensure_ready(&self, force: bool) -> HashMap<String, RefreshOutcome> {
        let mut handles = Vec::new();
        let mut outcomes = HashMap::new();

        for source in &self.config.sources {
            match self.job_for(source) {
                Ok(job) => handles.push((source.clone(), tokio::spawn(job.run(force)))),
                Err(err) => {
                    log::error!("[{source}] cannot refresh: {err}");
                    outcomes.insert(
                        source.clone(),
                        RefreshOutcome::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }

        for (source, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => RefreshOutcome::Failed {
                    reason: format!("refresh task panicked: {err}"),
                },
            };
            if let RefreshOutcome::Failed { reason } = &outcome {
                log::error!("[{source}] refresh failed: {reason}");
            }
            outcomes.insert(source, outcome);
        }

        let failed = outcomes.values().filter(|o| o.is_failed()).count();
        log::info!(
            "cache refresh complete: {} sources, {failed} failed",
            outcomes.len()
        );
        outcomes
    }

    /// Refresh a single source by name.
    pub async fn refresh_source(&self, source: &str, force: bool) -> Result<RefreshOutcome> {
        Ok(self.job_for(source)?.run(force).await)
    }

    fn job_for(&self, source: &str) -> Result<SourceRefresh> {
        let fetcher = self
            .fetchers
            .get(source)
            .ok_or_else(|| UpdaterError::UnknownSource(source.to_string()))?;
        Ok(SourceRefresh {
            source: source.to_string(),
            cache_dir: self.config.cache_dir.clone(),
            ttl_seconds: self.config.ttl_seconds,
            page_timeout: self.config.page_timeout,
            browser: self.browser.clone(),
            fetcher: fetcher.clone(),
        })
    }
}

/// Owned per-source refresh job, spawnable onto its own task.
struct SourceRefresh {
    source: String,
    cache_dir: PathBuf,
    ttl_seconds: u64,
    page_timeout: Duration,
    browser: Arc<dyn Browser>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl SourceRefresh {
    async fn run(self, force: bool) -> RefreshOutcome {
        let snapshots = SnapshotStore::new(&self.cache_dir, &self.source, self.ttl_seconds);

        // Cheap pre-check before taking the cross-process lock.
        if !force {
            if let Some(current) = snapshots.current().await {
                if !current.is_expired() {
                    log::debug!("[{}] snapshot {} still fresh", self.source, current.id());
                    return RefreshOutcome::Fresh {
                        snapshot_id: current.id().to_string(),
                    };
                }
            }
        }

        let pages = PageStore::new(
            self.cache_dir.join(&self.source),
            &self.source,
            self.ttl_seconds,
        );
        let fill = FillJob {
            refresh: &self,
            pages: &pages,
            force,
            filled: AtomicBool::new(false),
            stats: Mutex::new(RefreshStats::default()),
        };

        match snapshots.refresh(force, &fill).await {
            // The lock-holder race may have been lost: another process
            // refreshed while this one waited, and our fill never ran.
            Ok(snapshot) if !fill.filled.load(Ordering::SeqCst) => RefreshOutcome::Fresh {
                snapshot_id: snapshot.id().to_string(),
            },
            Ok(snapshot) => RefreshOutcome::Refreshed {
                snapshot_id: snapshot.id().to_string(),
                stats: *fill.stats.lock().await,
            },
            Err(err) => RefreshOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }

    /// Capture one page with bounded retries, then attach its API slice.
    async fn capture_page(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<PageData> {
        let mut last_err = UpdaterError::FetchError(format!("no attempts made for {url}"));

        for attempt in 1..=MAX_PAGE_ATTEMPTS {
            match tokio::time::timeout(self.page_timeout, session.capture(url)).await {
                Ok(Ok(captured)) => {
                    let asset_id = self.fetcher.asset_id(url).unwrap_or_default();
                    let api_slice = if asset_id.is_empty() {
                        Value::Null
                    } else {
                        match self.fetcher.fetch_api_slice(&asset_id).await {
                            Ok(slice) => slice,
                            Err(err) => {
                                log::warn!(
                                    "[{}] api slice for {asset_id} failed: {err}",
                                    self.source
                                );
                                Value::Null
                            }
                        }
                    };
                    let mut page = PageData::new(url, captured.html, api_slice)
                        .with_asset_id(asset_id)
                        .with_aux_responses(captured.aux_responses);
                    page.status = captured.status;
                    return Ok(page);
                }
                Ok(Err(err)) => last_err = err,
                Err(_) => last_err = UpdaterError::FetchTimeout(self.page_timeout),
            }

            if attempt < MAX_PAGE_ATTEMPTS {
                log::warn!(
                    "[{}] attempt {attempt}/{MAX_PAGE_ATTEMPTS} failed for {url}: {last_err}",
                    self.source
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(last_err)
    }
}

/// [`SnapshotFetch`] adapter that fills a generation page by page while
/// mirroring every capture into the flat page store.
struct FillJob<'a> {
    refresh: &'a SourceRefresh,
    pages: &'a PageStore,
    force: bool,
    filled: AtomicBool,
    stats: Mutex<RefreshStats>,
}

#[async_trait]
impl SnapshotFetch for FillJob<'_> {
    async fn fill(&self, snapshot: &mut SourceSnapshot) -> StoreResult<()> {
        self.filled.store(true, Ordering::SeqCst);
        let refresh = self.refresh;
        let source = &refresh.source;
        let urls = refresh.fetcher.page_urls();

        let mut session = refresh
            .browser
            .open_session()
            .await
            .map_err(into_store_err)?;

        let mut stats = RefreshStats::default();
        for url in &urls {
            if !self.force && self.pages.is_fresh(url, refresh.ttl_seconds).await {
                if let Some(page) = self.pages.get(url).await {
                    snapshot.set_page(&page).await?;
                    stats.skipped += 1;
                    continue;
                }
            }

            match refresh.capture_page(session.as_mut(), url).await {
                Ok(page) => {
                    self.pages.put(page.clone()).await?;
                    snapshot.set_page(&page).await?;
                    stats.updated += 1;
                }
                Err(err) => {
                    log::error!("[{source}] giving up on {url}: {err}");
                    stats.failed += 1;
                }
            }
        }

        if !urls.is_empty() && stats.updated == 0 && stats.skipped == 0 {
            return Err(StoreError::Other(format!(
                "all {} pages failed for {source}",
                urls.len()
            )));
        }

        let api: serde_json::Map<String, Value> =
            self.pages.aggregate_api_data().await.into_iter().collect();
        snapshot.set_api_data(&Value::Object(api)).await?;
        snapshot.finalize_page_count().await?;

        log::info!(
            "[{source}] pages: {} updated, {} skipped, {} failed",
            stats.updated,
            stats.skipped,
            stats.failed
        );
        *self.stats.lock().await = stats;
        Ok(())
    }
}

fn into_store_err(err: UpdaterError) -> StoreError {
    match err {
        UpdaterError::StoreError(inner) => inner,
        other => StoreError::Other(other.to_string()),
    }
}
