//! End-to-end `QueryService` behavior over a populated index, beyond the
//! empty-index cases `src/query.rs`'s in-module tests cover.

use std::sync::Arc;

use async_trait::async_trait;
use lifearch_core::bm25::Bm25Index;
use lifearch_core::chunk::InMemoryChunkStore;
use lifearch_core::error::Result;
use lifearch_core::llm::{Completion, CompletionRequest};
use lifearch_core::query::QueryService;
use lifearch_core::search::SearchService;
use lifearch_core::tracker::{JsonFileTracker, Tracker};
use lifearch_core::vector_store::{Embedder, FakeVectorStore, VectorPoint, VectorStore};
use tempfile::tempdir;

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct EchoCompletion;

#[async_trait]
impl Completion for EchoCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        Ok(format!("answer based on: {}", request.prompt))
    }
}

async fn populated_service(dir: &std::path::Path) -> Arc<QueryService> {
    let tracker: Arc<dyn Tracker> = Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
    let bm25 = Arc::new(Bm25Index::in_memory(false));
    let chunk_store: Arc<dyn lifearch_core::chunk::ChunkStore> = Arc::new(InMemoryChunkStore::new());
    let vector_store: Arc<dyn VectorStore> = Arc::new(FakeVectorStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder);

    tracker.add("doc1", &["n1".to_string()]).await.unwrap();
    tracker.store_full_metadata("doc1", &Default::default()).await.unwrap();
    vector_store
        .upsert(vec![VectorPoint {
            id: "n1".to_string(),
            vector: vec![1.0, 0.0],
            payload: serde_json::json!({
                "document_id": "doc1",
                "node_id": "n1",
                "text": "quarterly revenue grew 18% driven by new enterprise contracts",
            }),
        }])
        .await
        .unwrap();

    let search = Arc::new(SearchService::new(tracker, bm25, chunk_store, vector_store, embedder));
    let completion: Arc<dyn Completion> = Arc::new(EchoCompletion);
    Arc::new(QueryService::new(search, completion))
}

#[tokio::test]
async fn document_query_with_matching_sources_builds_context_and_answers() {
    let dir = tempdir().unwrap();
    let service = populated_service(dir.path()).await;

    let response = service.query("what happened to quarterly revenue?").await.unwrap();

    assert_eq!(response.method, "llamaindex_rag");
    assert!(response.context_used);
    assert_eq!(response.num_chunks_used, 1);
    assert!(response.answer.contains("quarterly revenue"));
    assert!(response.confidence_score > 0.0);
}

#[tokio::test]
async fn query_with_top_k_overrides_the_configured_default_without_mutating_state() {
    let dir = tempdir().unwrap();
    let service = populated_service(dir.path()).await;

    let narrow = service.query_with_top_k("what happened to revenue?", 0).await.unwrap();
    assert_eq!(narrow.num_chunks_used, 0);

    // The override must not leak into a later call using the default top_k.
    let default_call = service.query("what happened to revenue?").await.unwrap();
    assert_eq!(default_call.num_chunks_used, 1);
}
