//! End-to-end ingestion through `IngestionPipeline::ingest`, exercising the
//! dedup short-circuit and the `ready` happy path. `WorkQueue` and
//! `ProgressTracker` have no in-memory doubles (see `tests/queue_tests.rs`),
//! so these are `#[ignore]`d by default; run with `cargo test -- --ignored`
//! against a Redis on `REDIS_URL` (default `redis://127.0.0.1:6379`).

use std::sync::Arc;

use async_trait::async_trait;
use lifearch_core::bm25::Bm25Index;
use lifearch_core::chunk::InMemoryChunkStore;
use lifearch_core::error::Result;
use lifearch_core::ingestion::{IngestRequest, IngestionPipeline};
use lifearch_core::models::DocumentStatus;
use lifearch_core::progress::ProgressTracker;
use lifearch_core::queue::WorkQueue;
use lifearch_core::tracker::{JsonFileTracker, Tracker};
use lifearch_core::vault::Vault;
use lifearch_core::vector_store::{Embedder, FakeVectorStore};
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

async fn pipeline(dir: &std::path::Path) -> IngestionPipeline {
    let vault = Arc::new(Vault::new(dir.join("vault")));
    vault.initialize().await.unwrap();
    let tracker: Arc<dyn Tracker> = Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
    let bm25 = Arc::new(Bm25Index::in_memory(false));
    let chunk_store = Arc::new(InMemoryChunkStore::new());
    let vector_store = Arc::new(FakeVectorStore::new());
    let embedder = Arc::new(FixedEmbedder);
    let queue = Arc::new(WorkQueue::connect(&redis_url()).await.unwrap());
    let progress = Arc::new(ProgressTracker::connect(&redis_url()).await.unwrap());

    IngestionPipeline::new(vault, tracker, bm25, chunk_store, vector_store, embedder, queue, progress, true)
}

#[tokio::test]
#[ignore]
async fn ingesting_a_new_file_reaches_ready_and_enqueues_enrichment() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;

    let source = dir.path().join("report.txt");
    tokio::fs::write(&source, "a".repeat(200)).await.unwrap();

    let response = pipeline.ingest(IngestRequest::new(&source)).await.unwrap();

    assert_eq!(response.status, DocumentStatus::Ready);
    assert!(!response.deduped);
    assert_eq!(response.size, 200);
}

#[tokio::test]
#[ignore]
async fn reingesting_the_same_bytes_is_deduped_against_the_first_document() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;

    let source = dir.path().join("report.txt");
    tokio::fs::write(&source, "duplicate detection content").await.unwrap();

    let first = pipeline.ingest(IngestRequest::new(&source)).await.unwrap();

    let copy = dir.path().join("report-copy.txt");
    tokio::fs::copy(&source, &copy).await.unwrap();
    let second = pipeline.ingest(IngestRequest::new(&copy)).await.unwrap();

    assert!(second.deduped);
    assert_eq!(second.status, DocumentStatus::Duplicate);
    assert_eq!(second.file_id, first.file_id);
}

#[tokio::test]
#[ignore]
async fn ingesting_a_missing_file_fails_before_any_document_is_created() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(dir.path()).await;

    let missing = dir.path().join("does-not-exist.txt");
    let result = pipeline.ingest(IngestRequest::new(&missing)).await;

    assert!(result.is_err());
}
