//! Per-source advisory file lock guarding snapshot regeneration.
//!
//! The lock is the only cross-process mutual exclusion in the system: it is
//! held for the duration of one fetch-and-activate sequence and released on
//! drop. Callers must re-check snapshot freshness after acquiring it.

use crate::error::{Result, StoreError};
use crate::paths;
use fs2::FileExt;
use std::path::Path;
use std::time::Instant;

pub struct SourceLock {
    #[allow(dead_code)]
    file: std::fs::File,
}

impl Drop for SourceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl SourceLock {
    /// Acquire the exclusive lock for one source, blocking (off the async
    /// runtime) until any concurrent holder releases it.
    pub async fn acquire(source_dir: &Path) -> Result<SourceLock> {
        let path = paths::lock_path(source_dir);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let lock = tokio::task::spawn_blocking(move || -> Result<SourceLock> {
            use std::fs::OpenOptions;

            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|err| {
                    StoreError::LockError(format!("open lock {}: {err}", path.display()))
                })?;

            let start = Instant::now();
            file.lock_exclusive().map_err(|err| {
                StoreError::LockError(format!("acquire lock {}: {err}", path.display()))
            })?;
            let waited = start.elapsed();
            if waited.as_millis() > 50 {
                log::debug!("waited {}ms for lock {}", waited.as_millis(), path.display());
            }

            Ok(SourceLock { file })
        })
        .await
        .map_err(|err| StoreError::LockError(format!("join lock task: {err}")))??;

        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lock_file_is_created_in_source_dir() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path().join("coingecko");
        let _lock = SourceLock::acquire(&dir).await.expect("lock");
        assert!(dir.join("create.lock").exists());
    }

    #[tokio::test]
    async fn reacquire_after_drop_succeeds() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path().join("stooq");
        let lock = SourceLock::acquire(&dir).await.expect("first");
        drop(lock);
        let _lock = SourceLock::acquire(&dir).await.expect("second");
    }
}
