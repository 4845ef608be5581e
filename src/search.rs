//! SearchService (C9, §4.7): semantic, keyword, and hybrid retrieval with
//! metadata filter semantics shared with `tracker.rs`.
//!
//! Generalizes the teacher's `vector_store.rs::search_top_chunks` (a single
//! Neo4j-vector-index query) into the spec's three-mode service, reusing
//! `tracker::FilterSpec`/`matches_filters` for the operator grammar instead
//! of re-deriving it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::bm25::Bm25Index;
use crate::chunk::ChunkStore;
use crate::error::{ArchiveError, Result};
use crate::tracker::{matches_filters, FilterSpec, Tracker};
use crate::vector_store::{Embedder, VectorStore};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const NEIGHBOUR_DISCOVERY_THRESHOLD: f32 = 0.3;
pub const QA_CONTEXT_THRESHOLD: f32 = 0.45;
const HYBRID_SEMANTIC_THRESHOLD: f32 = 0.3;
const HYBRID_SEMANTIC_BOOST: f64 = 1.2;
const HYBRID_OVERLAP_BONUS: f64 = 0.1;
const DEFAULT_W_SEM: f64 = 0.6;
const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub node_id: Option<String>,
    pub text: Option<String>,
    pub score: f64,
    pub metadata: Value,
    pub search_type: &'static str,
}

pub struct SearchService {
    tracker: Arc<dyn Tracker>,
    bm25: Arc<Bm25Index>,
    chunk_store: Arc<dyn ChunkStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchService {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        bm25: Arc<Bm25Index>,
        chunk_store: Arc<dyn ChunkStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            tracker,
            bm25,
            chunk_store,
            vector_store,
            embedder,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filters: &HashMap<String, FilterSpec>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(ArchiveError::Validation("Query cannot be empty".to_string()));
        }
        match mode {
            SearchMode::Semantic => self.semantic_search(query, top_k, DEFAULT_SIMILARITY_THRESHOLD, filters).await,
            SearchMode::Keyword => self.keyword_search(query, top_k, filters).await,
            SearchMode::Hybrid => self.hybrid_search(query, top_k, filters).await,
        }
    }

    /// Embeds the query, asks the vector store for `2*top_k` neighbours (to
    /// allow filter attrition), filters by similarity threshold + metadata
    /// filter, then truncates.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
        filters: &HashMap<String, FilterSpec>,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_one(query).await?;
        let fetch_k = (top_k * 2).max(top_k);
        let matches = self.vector_store.search(&vector, fetch_k).await?;

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            if m.score < threshold {
                continue;
            }
            let document_id = m
                .payload
                .get("document_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if !filters.is_empty() {
                let Some(metadata) = self.tracker.get_full_metadata(&document_id).await? else {
                    continue;
                };
                if !matches_filters(&metadata, filters) {
                    continue;
                }
            }
            let text = m.payload.get("text").and_then(|v| v.as_str()).map(|s| truncate(s, SNIPPET_CHARS));
            let node_id = m.payload.get("node_id").and_then(|v| v.as_str()).map(String::from);
            results.push(SearchResult {
                document_id,
                node_id,
                text,
                score: m.score as f64,
                metadata: m.payload,
                search_type: "semantic",
            });
            if results.len() >= top_k {
                break;
            }
        }
        Ok(results)
    }

    /// `BM25Index.search(query, 2*top_k, min_score=0)`, joined against the
    /// tracker for document-level metadata.
    pub async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filters: &HashMap<String, FilterSpec>,
    ) -> Result<Vec<SearchResult>> {
        let hits = self.bm25.search(query, top_k * 2, 0.0).await;
        let mut results = Vec::with_capacity(hits.len());
        for (document_id, score) in hits {
            let Some(metadata) = self.tracker.get_full_metadata(&document_id).await? else {
                continue;
            };
            if !filters.is_empty() && !matches_filters(&metadata, filters) {
                continue;
            }
            results.push(SearchResult {
                document_id,
                node_id: None,
                text: None,
                score,
                metadata: metadata_to_value(&metadata),
                search_type: "keyword",
            });
            if results.len() >= top_k {
                break;
            }
        }
        Ok(results)
    }

    /// Runs semantic (lowered threshold) and keyword search, then fuses by
    /// `document_id` per §4.7's three-way tagging.
    pub async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
        filters: &HashMap<String, FilterSpec>,
    ) -> Result<Vec<SearchResult>> {
        let semantic = self
            .semantic_search(query, top_k * 2, HYBRID_SEMANTIC_THRESHOLD, filters)
            .await?;
        let keyword = self.keyword_search(query, top_k * 2, filters).await?;

        let mut semantic_by_doc: HashMap<String, &SearchResult> = HashMap::new();
        for r in &semantic {
            semantic_by_doc
                .entry(r.document_id.clone())
                .and_modify(|existing| {
                    if r.score > existing.score {
                        *existing = r;
                    }
                })
                .or_insert(r);
        }
        let mut keyword_by_doc: HashMap<String, &SearchResult> = HashMap::new();
        for r in &keyword {
            keyword_by_doc
                .entry(r.document_id.clone())
                .and_modify(|existing| {
                    if r.score > existing.score {
                        *existing = r;
                    }
                })
                .or_insert(r);
        }

        let all_doc_ids: HashSet<&String> = semantic_by_doc.keys().chain(keyword_by_doc.keys()).collect();

        let mut fused = Vec::with_capacity(all_doc_ids.len());
        for document_id in all_doc_ids {
            let sem = semantic_by_doc.get(document_id);
            let kw = keyword_by_doc.get(document_id);
            let (score, tag, base) = match (sem, kw) {
                (Some(s), Some(k)) => (
                    DEFAULT_W_SEM * s.score + (1.0 - DEFAULT_W_SEM) * k.score + HYBRID_OVERLAP_BONUS,
                    "hybrid_both",
                    *s,
                ),
                (Some(s), None) => (s.score * HYBRID_SEMANTIC_BOOST, "hybrid_semantic", *s),
                (None, Some(k)) => (k.score * (1.0 - DEFAULT_W_SEM), "hybrid_keyword", *k),
                (None, None) => unreachable!("document id came from one of the two maps"),
            };
            fused.push(SearchResult {
                document_id: document_id.clone(),
                node_id: base.node_id.clone(),
                text: base.text.clone(),
                score,
                metadata: base.metadata.clone(),
                search_type: tag,
            });
        }

        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(top_k);
        Ok(fused)
    }

    /// Uses up to 2000 characters of the document's first chunk as a query,
    /// filters out the source document, returns `top_k` neighbours.
    pub async fn get_document_neighbours(&self, document_id: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let node_ids = self.tracker.get_node_ids(document_id).await?;
        let Some(first_node_id) = node_ids.first() else {
            return Ok(Vec::new());
        };
        let Some(first_chunk) = self.chunk_store.get(first_node_id).await? else {
            return Ok(Vec::new());
        };
        let query: String = first_chunk.text.chars().take(2000).collect();
        let filters = HashMap::new();
        let results = self
            .semantic_search(&query, top_k + 1, NEIGHBOUR_DISCOVERY_THRESHOLD, &filters)
            .await?;
        Ok(results
            .into_iter()
            .filter(|r| r.document_id != document_id)
            .take(top_k)
            .collect())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn metadata_to_value(metadata: &HashMap<String, Value>) -> Value {
    Value::Object(metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::JsonFileTracker;
    use crate::vector_store::{FakeVectorStore, VectorPoint};
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn service(dir: &std::path::Path) -> (SearchService, Arc<dyn Tracker>, Arc<Bm25Index>, Arc<dyn VectorStore>) {
        let tracker: Arc<dyn Tracker> = Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
        let bm25 = Arc::new(Bm25Index::in_memory(false));
        let chunk_store: Arc<dyn ChunkStore> = Arc::new(crate::chunk::InMemoryChunkStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(FakeVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder);
        let service = SearchService::new(tracker.clone(), bm25.clone(), chunk_store, vector_store.clone(), embedder);
        (service, tracker, bm25, vector_store)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _tracker, _bm25, _vs) = service(dir.path()).await;
        let err = service
            .search("", SearchMode::Hybrid, 5, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
    }

    #[tokio::test]
    async fn keyword_search_joins_tracker_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (service, tracker, bm25, _vs) = service(dir.path()).await;

        tracker.add("doc1", &[]).await.unwrap();
        let mut meta = HashMap::new();
        meta.insert("mime_type".to_string(), Value::String("text/plain".to_string()));
        tracker.store_full_metadata("doc1", &meta).await.unwrap();
        bm25.add("doc1", "quarterly revenue grew in Q3").await.unwrap();

        let results = service.keyword_search("quarterly revenue", 5, &HashMap::new()).await.unwrap();
        assert_eq!(results[0].document_id, "doc1");
        assert_eq!(results[0].search_type, "keyword");
    }

    #[tokio::test]
    async fn hybrid_search_tags_overlap_as_hybrid_both() {
        let dir = tempfile::tempdir().unwrap();
        let (service, tracker, bm25, vector_store) = service(dir.path()).await;

        tracker.add("doc1", &["n1".to_string()]).await.unwrap();
        tracker.store_full_metadata("doc1", &HashMap::new()).await.unwrap();
        bm25.add("doc1", "quarterly revenue grew").await.unwrap();
        vector_store
            .upsert(vec![VectorPoint {
                id: "n1".to_string(),
                vector: vec![1.0, 0.0],
                payload: serde_json::json!({"document_id": "doc1", "text": "quarterly revenue grew", "node_id": "n1"}),
            }])
            .await
            .unwrap();

        let results = service.hybrid_search("quarterly revenue", 5, &HashMap::new()).await.unwrap();
        assert_eq!(results[0].document_id, "doc1");
        assert_eq!(results[0].search_type, "hybrid_both");
    }
}
