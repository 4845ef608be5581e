//! Cross-backend search behavior not exercised by `src/search.rs`'s
//! in-module tests (those cover empty-query rejection, keyword joins, and
//! hybrid tagging): metadata-filter attrition on semantic search, and
//! document-neighbour discovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lifearch_core::bm25::Bm25Index;
use lifearch_core::chunk::{ChunkStore, InMemoryChunkStore};
use lifearch_core::error::Result;
use lifearch_core::models::{Chunk, ChunkPayload, DocumentStatus};
use lifearch_core::search::{SearchMode, SearchService};
use lifearch_core::tracker::{FilterSpec, JsonFileTracker, Tracker};
use lifearch_core::vector_store::{Embedder, FakeVectorStore, VectorPoint, VectorStore};
use serde_json::Value;
use tempfile::tempdir;

fn chunk_payload(document_id: &str) -> ChunkPayload {
    ChunkPayload {
        document_id: document_id.to_string(),
        title: "test document".to_string(),
        mime_type: "text/plain".to_string(),
        status: DocumentStatus::Ready,
        theme: None,
        uploaded_date: Utc::now(),
        file_hash_short: "abcdef".to_string(),
    }
}

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

async fn service(dir: &std::path::Path) -> (SearchService, Arc<dyn Tracker>, Arc<dyn ChunkStore>, Arc<dyn VectorStore>) {
    let tracker: Arc<dyn Tracker> = Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
    let bm25 = Arc::new(Bm25Index::in_memory(false));
    let chunk_store: Arc<dyn ChunkStore> = Arc::new(InMemoryChunkStore::new());
    let vector_store: Arc<dyn VectorStore> = Arc::new(FakeVectorStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder);
    let svc = SearchService::new(tracker.clone(), bm25, chunk_store.clone(), vector_store.clone(), embedder);
    (svc, tracker, chunk_store, vector_store)
}

#[tokio::test]
async fn semantic_search_drops_hits_that_fail_the_metadata_filter() {
    let dir = tempdir().unwrap();
    let (service, tracker, _chunks, vector_store) = service(dir.path()).await;

    tracker.add("doc-invoice", &["n1".to_string()]).await.unwrap();
    let mut meta = HashMap::new();
    meta.insert("status".to_string(), Value::String("complete".to_string()));
    tracker.store_full_metadata("doc-invoice", &meta).await.unwrap();

    tracker.add("doc-pending", &["n2".to_string()]).await.unwrap();
    let mut meta2 = HashMap::new();
    meta2.insert("status".to_string(), Value::String("pending".to_string()));
    tracker.store_full_metadata("doc-pending", &meta2).await.unwrap();

    vector_store
        .upsert(vec![
            VectorPoint {
                id: "n1".to_string(),
                vector: vec![1.0, 0.0],
                payload: serde_json::json!({"document_id": "doc-invoice", "node_id": "n1", "text": "an invoice"}),
            },
            VectorPoint {
                id: "n2".to_string(),
                vector: vec![1.0, 0.0],
                payload: serde_json::json!({"document_id": "doc-pending", "node_id": "n2", "text": "another invoice"}),
            },
        ])
        .await
        .unwrap();

    let mut filters = HashMap::new();
    filters.insert("status".to_string(), FilterSpec::Eq(Value::String("complete".to_string())));

    let results = service
        .search("invoice", SearchMode::Semantic, 10, &filters)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "doc-invoice");
}

#[tokio::test]
async fn document_neighbours_exclude_the_source_document() {
    let dir = tempdir().unwrap();
    let (service, tracker, chunk_store, vector_store) = service(dir.path()).await;

    tracker.add("doc-a", &["n-a".to_string()]).await.unwrap();
    tracker.store_full_metadata("doc-a", &HashMap::new()).await.unwrap();
    tracker.add("doc-b", &["n-b".to_string()]).await.unwrap();
    tracker.store_full_metadata("doc-b", &HashMap::new()).await.unwrap();

    chunk_store
        .put_many(&[Chunk {
            node_id: "n-a".to_string(),
            document_id: "doc-a".to_string(),
            text: "shared subject matter about quarterly revenue".to_string(),
            start_char: 0,
            end_char: 46,
            prev_id: None,
            next_id: None,
            payload: chunk_payload("doc-a"),
        }])
        .await
        .unwrap();

    vector_store
        .upsert(vec![
            VectorPoint {
                id: "n-a".to_string(),
                vector: vec![1.0, 0.0],
                payload: serde_json::json!({"document_id": "doc-a", "node_id": "n-a", "text": "revenue"}),
            },
            VectorPoint {
                id: "n-b".to_string(),
                vector: vec![1.0, 0.0],
                payload: serde_json::json!({"document_id": "doc-b", "node_id": "n-b", "text": "revenue too"}),
            },
        ])
        .await
        .unwrap();

    let neighbours = service.get_document_neighbours("doc-a", 5).await.unwrap();
    assert!(neighbours.iter().all(|n| n.document_id != "doc-a"));
    assert_eq!(neighbours[0].document_id, "doc-b");
}
