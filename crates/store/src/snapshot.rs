//! Versioned, TTL-bearing snapshot directories with atomic publication.
//!
//! Each refresh writes a brand-new generation directory and only then swaps
//! the `current` pointer to it, so a reader racing a refresh sees either the
//! old generation or the fully-written new one. Regeneration is serialized
//! across processes by the per-source [`SourceLock`], with a freshness
//! re-check after acquisition so racing refreshers do the work once.

use crate::error::{Result, StoreError};
use crate::lock::SourceLock;
use crate::page::PageData;
use crate::{now_ts, paths};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Generations kept after activation, not counting the current one.
const MAX_RETAINED_SNAPSHOTS: usize = 3;

/// Immutable metadata of one snapshot generation.
///
/// A refresh always creates a new snapshot with fresh metadata; nothing
/// mutates a published generation in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceMeta {
    pub source: String,
    pub snapshot_id: String,
    pub created_at: f64,
    #[serde(rename = "ttl")]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub api_item_count: usize,
    #[serde(default)]
    pub page_count: usize,
}

impl SourceMeta {
    pub fn expires_at(&self) -> f64 {
        self.created_at + self.ttl_seconds as f64
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ts())
    }

    pub fn is_expired_at(&self, now: f64) -> bool {
        now > self.expires_at()
    }

    pub fn time_remaining_seconds(&self) -> f64 {
        (self.expires_at() - now_ts()).max(0.0)
    }
}

/// Handle to one generation directory: `meta.json`, `api.json`, `pages/`.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    path: PathBuf,
    meta: SourceMeta,
}

impl SourceSnapshot {
    /// Open an existing generation by reading its `meta.json`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta_path = path.join(paths::META_FILE_NAME);
        let data = tokio::fs::read_to_string(&meta_path).await.map_err(|_| {
            StoreError::InvalidSnapshot(format!("meta not found: {}", meta_path.display()))
        })?;
        let meta: SourceMeta = serde_json::from_str(&data)?;
        Ok(Self { path, meta })
    }

    pub fn id(&self) -> &str {
        &self.meta.snapshot_id
    }

    pub fn source(&self) -> &str {
        &self.meta.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    pub fn is_expired(&self) -> bool {
        self.meta.is_expired()
    }

    async fn save_meta(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.meta)?;
        tokio::fs::write(self.path.join(paths::META_FILE_NAME), data).await?;
        Ok(())
    }

    /// Full API blob for this source, if captured.
    pub async fn api_data(&self) -> Option<Value> {
        let api_path = self.path.join(paths::API_FILE_NAME);
        let data = tokio::fs::read_to_string(&api_path).await.ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Write the API blob and record its item count in the metadata.
    /// Only valid before activation; published snapshots are immutable.
    pub async fn set_api_data(&mut self, data: &Value) -> Result<()> {
        let serialized = serde_json::to_string(data)?;
        tokio::fs::write(self.path.join(paths::API_FILE_NAME), serialized).await?;
        self.meta.api_item_count = match data {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.len(),
            _ => 0,
        };
        self.save_meta().await
    }

    fn page_path(&self, url: &str) -> PathBuf {
        self.path
            .join(paths::PAGES_DIR_NAME)
            .join(paths::url_to_file_name(url))
    }

    pub async fn page(&self, url: &str) -> Option<PageData> {
        let data = tokio::fs::read_to_string(self.page_path(url)).await.ok()?;
        serde_json::from_str(&data).ok()
    }

    pub async fn has_page(&self, url: &str) -> bool {
        self.page_path(url).exists()
    }

    /// Store a captured page. Only valid before activation.
    pub async fn set_page(&self, page: &PageData) -> Result<()> {
        let path = self.page_path(&page.url);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string(page)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    pub async fn count_pages(&self) -> usize {
        let pages_dir = self.path.join(paths::PAGES_DIR_NAME);
        let Ok(mut entries) = tokio::fs::read_dir(&pages_dir).await else {
            return 0;
        };
        let mut count = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        count
    }

    /// Refresh the page count in metadata from what is on disk.
    /// Only valid before activation.
    pub async fn finalize_page_count(&mut self) -> Result<()> {
        self.meta.page_count = self.count_pages().await;
        self.save_meta().await
    }
}

/// Filler invoked by [`SnapshotStore::refresh`] while the source lock is
/// held: fetches the API blob and all pages into the new generation.
#[async_trait]
pub trait SnapshotFetch: Send + Sync {
    async fn fill(&self, snapshot: &mut SourceSnapshot) -> Result<()>;
}

/// Manages the generations of one source under `cache/<source>/`.
pub struct SnapshotStore {
    source_dir: PathBuf,
    source: String,
    ttl_seconds: u64,
}

impl SnapshotStore {
    pub fn new(cache_dir: impl AsRef<Path>, source: impl Into<String>, ttl_seconds: u64) -> Self {
        let source = source.into();
        Self {
            source_dir: cache_dir.as_ref().join(&source),
            source,
            ttl_seconds,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Resolve the `current` pointer. Returns `None` when the pointer is
    /// absent or its target generation has been deleted.
    pub async fn current(&self) -> Option<SourceSnapshot> {
        let pointer = paths::current_pointer_path(&self.source_dir);
        let target = resolve_pointer(&pointer).await?;
        match SourceSnapshot::load(&target).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                log::warn!("[{}] failed to load current snapshot: {err}", self.source);
                None
            }
        }
    }

    /// Allocate a new generation directory with fresh metadata. The
    /// generation is invisible to readers until [`Self::activate`] runs.
    pub async fn create_snapshot(&self) -> Result<SourceSnapshot> {
        tokio::fs::create_dir_all(&self.source_dir).await?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut snapshot_id = format!("{}{stamp}", paths::SNAPSHOT_DIR_PREFIX);
        // Sub-second re-creation within one process gets a disambiguated id.
        let mut candidate = self.source_dir.join(&snapshot_id);
        let mut attempt = 1;
        while candidate.exists() {
            snapshot_id = format!("{}{stamp}_{attempt}", paths::SNAPSHOT_DIR_PREFIX);
            candidate = self.source_dir.join(&snapshot_id);
            attempt += 1;
        }
        tokio::fs::create_dir_all(&candidate).await?;

        let meta = SourceMeta {
            source: self.source.clone(),
            snapshot_id: snapshot_id.clone(),
            created_at: now_ts(),
            ttl_seconds: self.ttl_seconds,
            api_item_count: 0,
            page_count: 0,
        };
        let snapshot = SourceSnapshot {
            path: candidate,
            meta,
        };
        snapshot.save_meta().await?;

        log::info!("[{}] created snapshot {snapshot_id}", self.source);
        Ok(snapshot)
    }

    /// Atomically swap the `current` pointer to `snapshot`, then prune old
    /// generations. The pointer is written to a temp name and renamed so it
    /// never exists half-formed.
    pub async fn activate(&self, snapshot: &SourceSnapshot) -> Result<()> {
        let pointer = paths::current_pointer_path(&self.source_dir);
        let tmp = self.source_dir.join("current.tmp");

        if tokio::fs::symlink_metadata(&tmp).await.is_ok() {
            tokio::fs::remove_file(&tmp).await?;
        }
        write_pointer(&tmp, snapshot.id()).await?;
        tokio::fs::rename(&tmp, &pointer).await?;

        log::info!("[{}] activated snapshot {}", self.source, snapshot.id());
        self.prune_old_snapshots().await;
        Ok(())
    }

    /// Regenerate this source's snapshot under the cross-process lock.
    ///
    /// After the lock is acquired the current snapshot is checked again:
    /// another process may have refreshed while this one waited, in which
    /// case its fresh snapshot is returned without refetching. Any failure
    /// while filling deletes the half-written generation before propagating,
    /// leaving the previously-current snapshot authoritative.
    pub async fn refresh(&self, force: bool, fetch: &dyn SnapshotFetch) -> Result<SourceSnapshot> {
        log::info!("[{}] acquiring refresh lock", self.source);
        let _lock = SourceLock::acquire(&self.source_dir).await?;

        if !force {
            if let Some(current) = self.current().await {
                if !current.is_expired() {
                    log::info!("[{}] already refreshed by another process", self.source);
                    return Ok(current);
                }
            }
        }

        let mut snapshot = self.create_snapshot().await?;
        match fetch.fill(&mut snapshot).await {
            Ok(()) => {
                snapshot.save_meta().await?;
                self.activate(&snapshot).await?;
                log::info!(
                    "[{}] refresh done: {} api items, {} pages",
                    self.source,
                    snapshot.meta().api_item_count,
                    snapshot.meta().page_count
                );
                Ok(snapshot)
            }
            Err(err) => {
                log::error!("[{}] snapshot creation failed: {err}", self.source);
                if snapshot.path().exists() {
                    let _ = tokio::fs::remove_dir_all(snapshot.path()).await;
                }
                Err(err)
            }
        }
    }

    /// Delete all but the most recent generations, never the current one.
    async fn prune_old_snapshots(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.source_dir).await else {
            return;
        };

        let mut generations: Vec<(PathBuf, f64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_dir() || !name.starts_with(paths::SNAPSHOT_DIR_PREFIX) {
                continue;
            }
            let created_at = match SourceSnapshot::load(&path).await {
                Ok(snapshot) => snapshot.meta().created_at,
                Err(_) => 0.0,
            };
            generations.push((path, created_at));
        }

        generations.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let current_path = self.current().await.map(|s| s.path().to_path_buf());
        for (path, _) in generations.into_iter().skip(MAX_RETAINED_SNAPSHOTS) {
            if Some(&path) == current_path.as_ref() {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => log::info!(
                    "[{}] removed old snapshot {}",
                    self.source,
                    path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
                ),
                Err(err) => log::warn!("[{}] failed to remove snapshot: {err}", self.source),
            }
        }
    }
}

/// Resolve the current pointer: a symlink where the platform supports it,
/// a plain file holding the generation name otherwise.
async fn resolve_pointer(pointer: &Path) -> Option<PathBuf> {
    let meta = tokio::fs::symlink_metadata(pointer).await.ok()?;
    let parent = pointer.parent()?.to_path_buf();

    let target = if meta.file_type().is_symlink() {
        let link = tokio::fs::read_link(pointer).await.ok()?;
        if link.is_absolute() {
            link
        } else {
            parent.join(link)
        }
    } else {
        let name = tokio::fs::read_to_string(pointer).await.ok()?;
        parent.join(name.trim())
    };

    target.is_dir().then_some(target)
}

#[cfg(unix)]
async fn write_pointer(tmp: &Path, target_name: &str) -> Result<()> {
    tokio::fs::symlink(target_name, tmp).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_pointer(tmp: &Path, target_name: &str) -> Result<()> {
    tokio::fs::write(tmp, target_name).await?;
    Ok(())
}
