//! QueryService (C10, §4.8/§4.8.1): intent gate, context build over
//! `SearchService`, LLM synthesis, confidence scoring, and a streaming
//! event sequence.
//!
//! Replaces the teacher's `rag.rs` (a single-shot Neo4j-vector-plus-graph
//! retrieval then `llm.answer_with_context`). The graph-expansion step has
//! no counterpart here; retrieval is C9's semantic search alone, at the
//! confidence-relevant `QA_CONTEXT_THRESHOLD`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Result;
use crate::llm::{Completion, CompletionRequest};
use crate::search::{SearchResult, SearchService, QA_CONTEXT_THRESHOLD};
use crate::tracker::FilterSpec;

const CHITCHAT_CLOSED_SET: [&str; 11] = [
    "hi", "hello", "hey", "thanks", "thank you", "bye", "goodbye", "how are you", "what's up",
    "sup", "yo",
];

const DOCUMENT_QUERY_OVERRIDE_KEYWORDS: [&str; 19] = [
    "document", "file", "pdf", "show", "find", "search", "what", "when", "where", "who", "how",
    "why", "tell me", "explain", "describe", "list", "summary", "summarize", "based on",
];
const DOCUMENT_QUERY_PHRASE_OVERRIDE: &str = "in my";

const CANNED_CHITCHAT_RESPONSE: &str =
    "Hi there! I'm here to help you find information in your documents. Ask me anything about what's been archived.";

const FAILURE_PHRASES: [&str; 7] = [
    "error", "failed", "unable", "cannot", "don't have", "not found", "insufficient",
];

const CONFIDENCE_WEIGHTS: (f64, f64, f64, f64) = (0.25, 0.35, 0.20, 0.20);
const SOURCE_COUNT_SATURATION: f64 = 5.0;
const ANSWER_LEN_SATURATION: f64 = 500.0;
const CONTEXT_LEN_SATURATION: f64 = 2000.0;

const DEFAULT_TOP_K: usize = 5;
const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

const SYSTEM_PROMPT: &str = r#"You are an assistant answering questions using only the supplied document context.
Use only the information in the context below. If the context does not contain the answer, say so explicitly."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    DocumentQuery,
    Chitchat,
}

/// Intent gate (§4.8), run before any retrieval.
pub fn classify_intent(query: &str) -> QueryIntent {
    let normalized = query.trim().to_lowercase();
    let word_count = normalized.split_whitespace().count();
    let is_chitchat = CHITCHAT_CLOSED_SET.contains(&normalized.as_str())
        || (word_count < 3 && !normalized.contains('?'));

    if !is_chitchat {
        return QueryIntent::DocumentQuery;
    }
    let has_override = DOCUMENT_QUERY_OVERRIDE_KEYWORDS
        .iter()
        .any(|kw| normalized.contains(kw))
        || normalized.contains(DOCUMENT_QUERY_PHRASE_OVERRIDE);
    if has_override {
        QueryIntent::DocumentQuery
    } else {
        QueryIntent::Chitchat
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub method: &'static str,
    pub context_used: bool,
    pub num_chunks_used: usize,
    pub confidence_score: f64,
    pub statistics: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueryEvent {
    IntentCheck { intent: QueryIntent },
    Sources { sources: Vec<SearchResult> },
    Chunk { text: String },
    Metadata {
        method: &'static str,
        confidence_score: f64,
        num_chunks_used: usize,
        context_used: bool,
        statistics: Value,
    },
    Error { message: String },
}

pub struct QueryService {
    search: Arc<SearchService>,
    completion: Arc<dyn Completion>,
    top_k: usize,
}

impl QueryService {
    pub fn new(search: Arc<SearchService>, completion: Arc<dyn Completion>) -> Self {
        Self {
            search,
            completion,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        self.query_with_top_k(question, self.top_k).await
    }

    /// Same as [`Self::query`] but overrides the configured `top_k` for this
    /// call only, for callers (the tool surface's `similarity_top_k`) that
    /// vary it per-request instead of at construction time.
    pub async fn query_with_top_k(&self, question: &str, top_k: usize) -> Result<QueryResponse> {
        if classify_intent(question) == QueryIntent::Chitchat {
            return Ok(chitchat_response());
        }
        self.answer_document_query(question, top_k).await
    }

    async fn answer_document_query(&self, question: &str, top_k: usize) -> Result<QueryResponse> {
        let filters = std::collections::HashMap::<String, FilterSpec>::new();
        let sources = self
            .search
            .semantic_search(question, top_k, QA_CONTEXT_THRESHOLD, &filters)
            .await?;

        let context = build_context(&sources);
        let prompt = format!("Context:\n{context}\n\nQuestion:\n{question}");
        let answer = self
            .completion
            .complete(CompletionRequest::new(SYSTEM_PROMPT, prompt))
            .await?;

        let confidence_score = compute_confidence(&sources, &answer, &context);
        Ok(QueryResponse {
            answer,
            context_used: !sources.is_empty(),
            num_chunks_used: sources.len(),
            confidence_score,
            statistics: serde_json::json!({
                "num_sources": sources.len(),
                "context_chars": context.chars().count(),
            }),
            sources,
            method: "llamaindex_rag",
        })
    }

    /// Streaming variant: `intent_check` -> `sources` -> zero-or-more
    /// `chunk` -> `metadata` (or `error`). Dropping the receiver stops the
    /// producing task at its next send, discarding any partial answer.
    pub fn query_stream(self: Arc<Self>, question: String) -> ReceiverStream<QueryEvent> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let intent = classify_intent(&question);
            if tx.send(QueryEvent::IntentCheck { intent }).await.is_err() {
                return;
            }

            if intent == QueryIntent::Chitchat {
                if tx.send(QueryEvent::Sources { sources: Vec::new() }).await.is_err() {
                    return;
                }
                for ch in CANNED_CHITCHAT_RESPONSE.chars() {
                    if tx.send(QueryEvent::Chunk { text: ch.to_string() }).await.is_err() {
                        return;
                    }
                }
                let _ = tx
                    .send(QueryEvent::Metadata {
                        method: "direct_response",
                        confidence_score: 1.0,
                        num_chunks_used: 0,
                        context_used: false,
                        statistics: serde_json::json!({}),
                    })
                    .await;
                return;
            }

            let filters = std::collections::HashMap::<String, FilterSpec>::new();
            let sources = match self
                .search
                .semantic_search(&question, self.top_k, QA_CONTEXT_THRESHOLD, &filters)
                .await
            {
                Ok(sources) => sources,
                Err(err) => {
                    let _ = tx.send(QueryEvent::Error { message: err.to_string() }).await;
                    return;
                }
            };
            if tx.send(QueryEvent::Sources { sources: sources.clone() }).await.is_err() {
                return;
            }

            let context = build_context(&sources);
            let prompt = format!("Context:\n{context}\n\nQuestion:\n{question}");
            let answer = match self
                .completion
                .complete(CompletionRequest::new(SYSTEM_PROMPT, prompt))
                .await
            {
                Ok(answer) => answer,
                Err(err) => {
                    let _ = tx.send(QueryEvent::Error { message: err.to_string() }).await;
                    return;
                }
            };

            for word in answer.split_inclusive(' ') {
                if tx.send(QueryEvent::Chunk { text: word.to_string() }).await.is_err() {
                    return;
                }
            }

            let confidence_score = compute_confidence(&sources, &answer, &context);
            let _ = tx
                .send(QueryEvent::Metadata {
                    method: "llamaindex_rag",
                    confidence_score,
                    num_chunks_used: sources.len(),
                    context_used: !sources.is_empty(),
                    statistics: serde_json::json!({
                        "num_sources": sources.len(),
                        "context_chars": context.chars().count(),
                    }),
                })
                .await;
        });
        ReceiverStream::new(rx)
    }
}

fn chitchat_response() -> QueryResponse {
    QueryResponse {
        answer: CANNED_CHITCHAT_RESPONSE.to_string(),
        sources: Vec::new(),
        method: "direct_response",
        context_used: false,
        num_chunks_used: 0,
        confidence_score: 1.0,
        statistics: serde_json::json!({}),
    }
}

fn build_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            s.text.as_ref().map(|text| {
                format!(
                    "[Chunk {} | Doc: {} | Score: {:.3}]\n{}",
                    i + 1,
                    s.document_id,
                    s.score,
                    text
                )
            })
        })
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// §4.8.1 confidence function.
fn compute_confidence(sources: &[SearchResult], answer: &str, context: &str) -> f64 {
    let (w0, w1, w2, w3) = CONFIDENCE_WEIGHTS;
    let s = sources.len() as f64;
    let r = if sources.is_empty() {
        0.0
    } else {
        sources.iter().map(|src| src.score).sum::<f64>() / sources.len() as f64
    };
    let a = answer.chars().count() as f64;
    let c = context.chars().count() as f64;

    let mut confidence = w0 * (s / SOURCE_COUNT_SATURATION).min(1.0)
        + w1 * r.clamp(0.0, 1.0)
        + w2 * (a / ANSWER_LEN_SATURATION).min(1.0)
        + w3 * (c / CONTEXT_LEN_SATURATION).min(1.0);

    let lowered = answer.to_lowercase();
    if FAILURE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        confidence *= 0.5;
    }

    confidence = confidence.clamp(0.0, 1.0);
    (confidence * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn greeting_words_are_chitchat() {
        for greeting in ["hi", "Hello", "  hey  ", "thanks"] {
            assert_eq!(classify_intent(greeting), QueryIntent::Chitchat);
        }
    }

    #[test]
    fn short_non_question_is_chitchat() {
        assert_eq!(classify_intent("ok cool"), QueryIntent::Chitchat);
    }

    #[test]
    fn override_keywords_force_document_query() {
        assert_eq!(classify_intent("hi, what is in my documents?"), QueryIntent::DocumentQuery);
        assert_eq!(classify_intent("find the pdf"), QueryIntent::DocumentQuery);
    }

    #[test]
    fn long_question_is_document_query() {
        assert_eq!(
            classify_intent("what happened to revenue in Q3 this year?"),
            QueryIntent::DocumentQuery
        );
    }

    #[test]
    fn confidence_scales_with_sources_answer_and_context() {
        let sources = vec![search_result(0.9), search_result(0.8)];
        let confidence = compute_confidence(&sources, "revenue grew 18% in Q3", "some context");
        assert!(confidence > 0.0 && confidence <= 1.0);
    }

    #[test]
    fn failure_phrase_halves_confidence() {
        let sources = vec![search_result(0.9)];
        let with_failure = compute_confidence(&sources, "I don't have that information", "context");
        let without_failure = compute_confidence(&sources, "revenue grew 18%", "context");
        assert!(with_failure < without_failure);
    }

    #[test]
    fn confidence_is_clamped_and_rounded() {
        let sources: Vec<SearchResult> = (0..10).map(|_| search_result(1.0)).collect();
        let confidence = compute_confidence(&sources, &"x".repeat(5000), &"y".repeat(5000));
        assert!(confidence <= 1.0);
        assert_eq!((confidence * 1000.0).fract(), 0.0);
    }

    fn search_result(score: f64) -> SearchResult {
        SearchResult {
            document_id: "doc1".to_string(),
            node_id: None,
            text: Some("revenue grew 18% in Q3".to_string()),
            score,
            metadata: serde_json::json!({}),
            search_type: "semantic",
        }
    }

    struct FakeCompletion(String);

    #[async_trait]
    impl Completion for FakeCompletion {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    async fn service_with_answer(dir: &std::path::Path, answer: &str) -> Arc<QueryService> {
        use crate::bm25::Bm25Index;
        use crate::chunk::InMemoryChunkStore;
        use crate::tracker::JsonFileTracker;
        use crate::vector_store::{Embedder, FakeVectorStore};

        struct FixedEmbedder;
        #[async_trait]
        impl Embedder for FixedEmbedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let tracker: Arc<dyn crate::tracker::Tracker> =
            Arc::new(JsonFileTracker::open(dir.join("tracker.json")).await.unwrap());
        let bm25 = Arc::new(Bm25Index::in_memory(false));
        let chunk_store: Arc<dyn crate::chunk::ChunkStore> = Arc::new(InMemoryChunkStore::new());
        let vector_store: Arc<dyn crate::vector_store::VectorStore> = Arc::new(FakeVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder);
        let search = Arc::new(SearchService::new(tracker, bm25, chunk_store, vector_store, embedder));
        let completion: Arc<dyn Completion> = Arc::new(FakeCompletion(answer.to_string()));
        Arc::new(QueryService::new(search, completion))
    }

    #[tokio::test]
    async fn chitchat_query_returns_canned_answer_with_full_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_answer(dir.path(), "unused").await;
        let response = service.query("hi").await.unwrap();
        assert_eq!(response.method, "direct_response");
        assert!(response.sources.is_empty());
        assert_eq!(response.confidence_score, 1.0);
        assert!(response.answer.contains("help you find information"));
    }

    #[tokio::test]
    async fn document_query_with_no_sources_still_returns_an_answer() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_answer(dir.path(), "I don't have that information").await;
        let response = service.query("what happened to revenue in Q3?").await.unwrap();
        assert_eq!(response.method, "llamaindex_rag");
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn streaming_chitchat_emits_intent_then_chunks_then_metadata() {
        use futures::StreamExt;
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_answer(dir.path(), "unused").await;
        let mut stream = service.query_stream("hi".to_string());

        let first = stream.next().await.unwrap();
        assert!(matches!(first, QueryEvent::IntentCheck { intent: QueryIntent::Chitchat }));

        let second = stream.next().await.unwrap();
        assert!(matches!(second, QueryEvent::Sources { .. }));

        let mut saw_chunk = false;
        let mut saw_metadata = false;
        while let Some(event) = stream.next().await {
            match event {
                QueryEvent::Chunk { .. } => saw_chunk = true,
                QueryEvent::Metadata { method, confidence_score, .. } => {
                    assert_eq!(method, "direct_response");
                    assert_eq!(confidence_score, 1.0);
                    saw_metadata = true;
                }
                _ => {}
            }
        }
        assert!(saw_chunk);
        assert!(saw_metadata);
    }
}
