//! Shared per-evaluation state.
//!
//! One context is built per evaluation run and threaded explicitly to
//! everything that needs cache access. Store handles are created lazily
//! and shared, so repeated lookups for the same source reuse one
//! in-memory page cache.

use crate::config::UpdaterConfig;
use replay_store::{CacheStatusView, PageStore, SnapshotStore, SourceSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct EvaluationContext {
    config: UpdaterConfig,
    page_stores: RwLock<HashMap<String, Arc<PageStore>>>,
}

impl EvaluationContext {
    pub fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            page_stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn sources(&self) -> &[String] {
        &self.config.sources
    }

    /// Shared page store for one source, created on first use.
    pub async fn page_store(&self, source: &str) -> Arc<PageStore> {
        if let Some(store) = self.page_stores.read().await.get(source) {
            return store.clone();
        }

        let mut stores = self.page_stores.write().await;
        stores
            .entry(source.to_string())
            .or_insert_with(|| {
                Arc::new(PageStore::new(
                    self.config.cache_dir.join(source),
                    source,
                    self.config.ttl_seconds,
                ))
            })
            .clone()
    }

    /// Snapshot store for one source. Cheap to construct, so not cached.
    pub fn snapshot_store(&self, source: &str) -> SnapshotStore {
        SnapshotStore::new(&self.config.cache_dir, source, self.config.ttl_seconds)
    }

    /// Currently-active snapshot for one source, if any.
    pub async fn current_snapshot(&self, source: &str) -> Option<SourceSnapshot> {
        self.snapshot_store(source).current().await
    }

    /// Status of every configured source, for operator-facing reporting.
    pub async fn status(&self) -> CacheStatusView {
        CacheStatusView::collect(
            &self.config.cache_dir,
            &self.config.sources,
            self.config.ttl_seconds,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context() -> EvaluationContext {
        EvaluationContext::new(UpdaterConfig {
            cache_dir: PathBuf::from("/tmp/replay-cache-test"),
            sources: vec!["coingecko".to_string(), "stooq".to_string()],
            ..UpdaterConfig::default()
        })
    }

    #[tokio::test]
    async fn page_store_handles_are_shared() {
        let ctx = context();
        let a = ctx.page_store("coingecko").await;
        let b = ctx.page_store("coingecko").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn sources_come_from_config() {
        let ctx = context();
        assert_eq!(ctx.sources(), ["coingecko", "stooq"]);
    }
}
