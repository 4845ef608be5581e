//! `FolderWatcher` folder-registry behavior and the debounced
//! detect-then-ingest path, against a live Redis and filesystem. No
//! in-memory double exists for the same reason `WorkQueue` doesn't (see
//! `tests/queue_tests.rs`). Run with `cargo test -- --ignored` against a
//! Redis on `REDIS_URL` (default `redis://127.0.0.1:6379`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lifearch_core::activity::ActivityLog;
use lifearch_core::bm25::Bm25Index;
use lifearch_core::chunk::InMemoryChunkStore;
use lifearch_core::error::Result;
use lifearch_core::ingestion::IngestionPipeline;
use lifearch_core::models::FolderStatus;
use lifearch_core::progress::ProgressTracker;
use lifearch_core::queue::WorkQueue;
use lifearch_core::tracker::{JsonFileTracker, Tracker};
use lifearch_core::vault::Vault;
use lifearch_core::vector_store::{Embedder, FakeVectorStore};
use lifearch_core::watcher::FolderWatcher;
use tempfile::tempdir;

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn watcher(dir: &std::path::Path) -> Arc<FolderWatcher> {
    let vault = Arc::new(Vault::new(dir.join("vault")));
    vault.initialize().await.unwrap();
    let tracker: Arc<dyn Tracker> = Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
    let bm25 = Arc::new(Bm25Index::in_memory(false));
    let chunk_store = Arc::new(InMemoryChunkStore::new());
    let vector_store = Arc::new(FakeVectorStore::new());
    let embedder = Arc::new(FixedEmbedder);
    let queue = Arc::new(WorkQueue::connect(&redis_url()).await.unwrap());
    let progress = Arc::new(ProgressTracker::connect(&redis_url()).await.unwrap());
    let ingestion = Arc::new(IngestionPipeline::new(
        vault.clone(), tracker, bm25, chunk_store, vector_store, embedder, queue, progress, true,
    ));
    let activity = Arc::new(ActivityLog::connect(&redis_url()).await.unwrap());

    FolderWatcher::new(&redis_url(), vault, ingestion, activity, 2, 0.2, 3)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn add_folder_rejects_duplicates_and_respects_max_folders() {
    let dir = tempdir().unwrap();
    let watcher = watcher(dir.path()).await;

    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let c = tempdir().unwrap();
    let d = tempdir().unwrap();

    watcher.add_folder(a.path(), false).await.unwrap();
    watcher.add_folder(b.path(), false).await.unwrap();
    watcher.add_folder(c.path(), false).await.unwrap();

    assert!(watcher.add_folder(a.path(), false).await.is_err());
    assert!(watcher.add_folder(d.path(), false).await.is_err());
    assert_eq!(watcher.list_folders().await.len(), 3);
}

#[tokio::test]
#[ignore]
async fn set_enabled_toggles_status_and_remove_folder_forgets_it() {
    let dir = tempdir().unwrap();
    let watcher = watcher(dir.path()).await;
    let folder = tempdir().unwrap();

    let id = watcher.add_folder(folder.path(), false).await.unwrap();
    let listed = watcher.list_folders().await;
    assert_eq!(listed.iter().find(|f| f.id == id).unwrap().status, FolderStatus::Stopped);

    watcher.set_enabled(&id, true).await.unwrap();
    let listed = watcher.list_folders().await;
    assert_eq!(listed.iter().find(|f| f.id == id).unwrap().status, FolderStatus::Active);

    watcher.remove_folder(&id).await.unwrap();
    assert!(watcher.list_folders().await.iter().all(|f| f.id != id));
}

#[tokio::test]
#[ignore]
async fn dropping_a_file_into_a_watched_folder_gets_ingested_after_debounce() {
    let dir = tempdir().unwrap();
    let watcher = watcher(dir.path()).await;
    let folder = tempdir().unwrap();

    watcher.add_folder(folder.path(), true).await.unwrap();
    tokio::fs::write(folder.path().join("note.txt"), "content dropped into a watched folder")
        .await
        .unwrap();

    // Debounce is 0.2s; give the consumer loop room to run past it.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let stats = watcher.list_folders().await.into_iter().next().unwrap().stats;
    assert_eq!(stats.ingested, 1);
}
