use async_trait::async_trait;
use replay_store::{
    PageData, Result, SnapshotFetch, SnapshotStore, SourceSnapshot, StoreError,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

struct CountingFetch {
    fills: AtomicUsize,
}

impl CountingFetch {
    fn new() -> Self {
        Self {
            fills: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotFetch for CountingFetch {
    async fn fill(&self, snapshot: &mut SourceSnapshot) -> Result<()> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        snapshot
            .set_api_data(&json!({"bitcoin": {"price": 100000}}))
            .await?;
        snapshot
            .set_page(&PageData::new(
                "https://www.coingecko.com/en/coins/bitcoin",
                "<h1>Bitcoin</h1>",
                json!({"id": "bitcoin"}),
            ))
            .await?;
        snapshot.finalize_page_count().await?;
        Ok(())
    }
}

struct FailingFetch;

#[async_trait]
impl SnapshotFetch for FailingFetch {
    async fn fill(&self, _snapshot: &mut SourceSnapshot) -> Result<()> {
        Err(StoreError::Other("browser crashed".to_string()))
    }
}

fn snapshot_dir_count(source_dir: &std::path::Path) -> usize {
    std::fs::read_dir(source_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.path().is_dir()
                        && e.file_name().to_string_lossy().starts_with("snapshot_")
                })
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn current_is_none_before_first_refresh() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    assert!(store.current().await.is_none());
}

#[tokio::test]
async fn refresh_creates_and_activates_snapshot() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();

    let snapshot = store.refresh(false, &fetch).await.expect("refresh");
    assert_eq!(snapshot.meta().api_item_count, 1);
    assert_eq!(snapshot.meta().page_count, 1);

    let current = store.current().await.expect("current");
    assert_eq!(current.id(), snapshot.id());
    assert_eq!(
        current.api_data().await.expect("api"),
        json!({"bitcoin": {"price": 100000}})
    );
    let page = current
        .page("https://www.coingecko.com/en/coins/bitcoin")
        .await
        .expect("page");
    assert_eq!(page.html, "<h1>Bitcoin</h1>");
}

#[tokio::test]
async fn refresh_with_fresh_snapshot_short_circuits() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();

    let first = store.refresh(false, &fetch).await.expect("first");
    let second = store.refresh(false, &fetch).await.expect("second");

    assert_eq!(first.id(), second.id());
    assert_eq!(fetch.fills.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_refreshes_fetch_exactly_once() {
    let temp = TempDir::new().expect("tempdir");
    let fetch = Arc::new(CountingFetch::new());

    let store_a = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let store_b = SnapshotStore::new(temp.path(), "coingecko", 3600);

    let (a, b) = tokio::join!(
        store_a.refresh(false, fetch.as_ref()),
        store_b.refresh(false, fetch.as_ref()),
    );
    let a = a.expect("refresh a");
    let b = b.expect("refresh b");

    assert_eq!(a.id(), b.id(), "loser must observe the winner's snapshot");
    assert_eq!(fetch.fills.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_refresh_deletes_partial_generation_and_keeps_old() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();

    let good = store.refresh(false, &fetch).await.expect("refresh");

    let err = store.refresh(true, &FailingFetch).await;
    assert!(err.is_err());

    let current = store.current().await.expect("old snapshot survives");
    assert_eq!(current.id(), good.id());
    assert_eq!(snapshot_dir_count(store.source_dir()), 1);
}

#[tokio::test]
async fn reader_never_sees_partial_generation() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();
    let old = store.refresh(false, &fetch).await.expect("seed");

    struct PausingFetch {
        started: Arc<Notify>,
        resume: Arc<Notify>,
    }

    #[async_trait]
    impl SnapshotFetch for PausingFetch {
        async fn fill(&self, snapshot: &mut SourceSnapshot) -> Result<()> {
            snapshot.set_api_data(&json!({"v": 2})).await?;
            self.started.notify_one();
            self.resume.notified().await;
            Ok(())
        }
    }

    let started = Arc::new(Notify::new());
    let resume = Arc::new(Notify::new());
    let pausing = PausingFetch {
        started: started.clone(),
        resume: resume.clone(),
    };

    let reader = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let old_id = old.id().to_string();
    let root = temp.path().to_path_buf();
    let refresh = tokio::spawn(async move {
        let store = SnapshotStore::new(root, "coingecko", 3600);
        store.refresh(true, &pausing).await
    });

    // Mid-refresh: the new generation exists on disk but is not current yet.
    started.notified().await;
    let seen = reader.current().await.expect("current");
    assert_eq!(seen.id(), old_id);

    resume.notify_one();
    let new = refresh.await.expect("join").expect("refresh");
    let seen = reader.current().await.expect("current");
    assert_eq!(seen.id(), new.id());
}

#[tokio::test]
async fn activation_prunes_old_generations() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();

    for _ in 0..5 {
        store.refresh(true, &fetch).await.expect("refresh");
    }

    assert!(snapshot_dir_count(store.source_dir()) <= 3);
    assert!(store.current().await.is_some());
}

#[tokio::test]
async fn pointer_to_deleted_generation_reads_as_missing() {
    let temp = TempDir::new().expect("tempdir");
    let store = SnapshotStore::new(temp.path(), "coingecko", 3600);
    let fetch = CountingFetch::new();

    let snapshot = store.refresh(false, &fetch).await.expect("refresh");
    tokio::fs::remove_dir_all(snapshot.path())
        .await
        .expect("delete generation");

    assert!(store.current().await.is_none());
}
