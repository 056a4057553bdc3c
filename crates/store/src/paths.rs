//! Cache directory layout and the URL → storage-key mapping.
//!
//! The layout is stable and shared with pre-existing caches:
//!
//! ```text
//! cache/<source>/pages/<slug>[_<queryhash8>].json
//! cache/<source>/current -> snapshot_<timestamp>/
//! cache/<source>/snapshot_<timestamp>/{meta.json,api.json,pages/}
//! cache/<source>/create.lock
//! ```

use replay_protocol::ParsedUrl;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const PAGES_DIR_NAME: &str = "pages";
pub const CURRENT_POINTER_NAME: &str = "current";
pub const LOCK_FILE_NAME: &str = "create.lock";
pub const META_FILE_NAME: &str = "meta.json";
pub const API_FILE_NAME: &str = "api.json";
pub const SNAPSHOT_DIR_PREFIX: &str = "snapshot_";

/// Convert a URL to its page file name.
///
/// Path segments are slugified (`/en/coins/bitcoin` → `en_coins_bitcoin`);
/// when a query string is present, 8 hex chars of its hash are appended so
/// URLs differing only by query still map to distinct keys.
pub fn url_to_file_name(url: &str) -> String {
    let parsed = ParsedUrl::parse(url);

    let (path, query) = match &parsed {
        Some(p) => (p.path.as_str(), p.query.as_deref()),
        None => (url, None),
    };

    let mut slug = path.trim_matches('/').replace('/', "_");
    if slug.is_empty() {
        slug = "index".to_string();
    }
    if let Some(query) = query {
        slug.push('_');
        slug.push_str(&query_hash(query));
    }

    let safe: String = slug
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!("{safe}.json")
}

/// First 8 hex chars of the query string's hash.
pub fn query_hash(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let mut out = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn pages_dir(source_dir: &Path) -> PathBuf {
    source_dir.join(PAGES_DIR_NAME)
}

pub fn page_path(source_dir: &Path, url: &str) -> PathBuf {
    pages_dir(source_dir).join(url_to_file_name(url))
}

pub fn current_pointer_path(source_dir: &Path) -> PathBuf {
    source_dir.join(CURRENT_POINTER_NAME)
}

pub fn lock_path(source_dir: &Path) -> PathBuf {
    source_dir.join(LOCK_FILE_NAME)
}
