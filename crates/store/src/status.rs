//! Read-only cache status aggregation for operators.
//!
//! Lets a "data not collected" pattern be told apart from "system broken"
//! without re-running an evaluation. Never authoritative state.

use crate::snapshot::SnapshotStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceStatus {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    pub is_expired: bool,
    pub time_remaining_hours: f64,
    pub api_items: usize,
    pub pages: usize,
}

impl SourceStatus {
    fn missing() -> Self {
        Self {
            exists: false,
            snapshot_id: None,
            created_at: None,
            expires_at: None,
            is_expired: true,
            time_remaining_hours: 0.0,
            api_items: 0,
            pages: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusView {
    pub cache_dir: String,
    pub sources: BTreeMap<String, SourceStatus>,
    pub all_exist: bool,
    pub any_expired: bool,
}

impl CacheStatusView {
    /// Collect status across `sources` under `cache_dir`, using each
    /// source's TTL for expiry reporting.
    pub async fn collect(cache_dir: &Path, sources: &[String], ttl_seconds: u64) -> Self {
        let mut by_source = BTreeMap::new();
        let mut all_exist = true;
        let mut any_expired = false;

        for source in sources {
            let store = SnapshotStore::new(cache_dir, source.clone(), ttl_seconds);
            let status = match store.current().await {
                None => {
                    all_exist = false;
                    SourceStatus::missing()
                }
                Some(snapshot) => {
                    let meta = snapshot.meta();
                    let is_expired = meta.is_expired();
                    if is_expired {
                        any_expired = true;
                    }
                    SourceStatus {
                        exists: true,
                        snapshot_id: Some(meta.snapshot_id.clone()),
                        created_at: Some(meta.created_at),
                        expires_at: Some(meta.expires_at()),
                        is_expired,
                        time_remaining_hours: meta.time_remaining_seconds() / 3600.0,
                        api_items: meta.api_item_count,
                        pages: meta.page_count,
                    }
                }
            };
            by_source.insert(source.clone(), status);
        }

        Self {
            cache_dir: cache_dir.display().to_string(),
            sources: by_source,
            all_exist,
            any_expired,
        }
    }
}
