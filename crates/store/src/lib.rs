//! Durable page and snapshot storage for deterministic web replay.
//!
//! Two storage models share one directory layout under `cache/<source>/`:
//!
//! - [`PageStore`]: flat per-URL entries, each bundling the HTML and the
//!   API slice captured by the same fetch. The pair is written as one
//!   atomic file so readers never observe HTML newer than its data.
//! - [`SnapshotStore`]: versioned generation directories with a TTL-bearing
//!   meta, published atomically by swapping a `current` pointer. Regeneration
//!   is guarded by a per-source advisory file lock so two processes racing
//!   to refresh the same source perform exactly one fetch sequence.

pub mod error;
pub mod lock;
pub mod page;
pub mod paths;
pub mod snapshot;
pub mod status;

pub use error::{Result, StoreError};
pub use lock::SourceLock;
pub use page::{PageData, PageStore};
pub use snapshot::{SnapshotFetch, SnapshotStore, SourceMeta, SourceSnapshot};
pub use status::{CacheStatusView, SourceStatus};

/// Seconds since the unix epoch, as the fractional timestamp stored in
/// page entries and snapshot metadata.
pub fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Default TTL for pages and snapshots: 24 hours.
pub const DEFAULT_TTL_SECONDS: u64 = 24 * 3600;
