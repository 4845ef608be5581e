//! VectorStore adapter (C6, §4.5/§6) + Embedder. Both the vector-store
//! engine and the embedding model runtime are out of scope per spec.md §1
//! ("treated as a black box"); this module is the adapter boundary only.
//!
//! Generalizes the teacher's `vector_store.rs` (a Neo4j-specific
//! `search_top_chunks` over `:Chunk(embedding)`) into an async trait with two
//! implementors, the way the teacher's own `LlmProvider` match dispatches on
//! provider. `Embedder` keeps the teacher's `llm.rs::embed_with_openai`
//! rig-core call shape, generalized off the single-document loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| ArchiveError::Internal(anyhow::anyhow!("embedder returned no vectors")))
    }
}

/// Rig-backed embedder (generalizes `llm.rs::embed_with_openai`).
pub struct RigEmbedder {
    model_name: String,
}

impl RigEmbedder {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl Embedder for RigEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let model_name = if self.model_name.is_empty() {
            openai::TEXT_EMBEDDING_3_SMALL
        } else {
            self.model_name.as_str()
        };
        let embedding_model = client.embedding_model(model_name);
        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("embedding call: {e}")))?;

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }
}

/// Qdrant REST adapter. Grounded on `other_examples/.../mr-nozko-rag-mcp`'s
/// use of a plain `reqwest` client against a vector-store HTTP API, rather
/// than pulling in a dedicated SDK crate for the handful of endpoints used.
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantVectorStore {
    pub fn new(qdrant_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: qdrant_url.into(),
            collection: collection.into(),
        }
    }

    /// Create the collection if it doesn't already exist. `dim` is the
    /// embedding vector size.
    pub async fn ensure_collection(&self, dim: usize) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = serde_json::json!({
            "vectors": { "size": dim, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("qdrant: {e}")))?;
        if !response.status().is_success() && response.status().as_u16() != 409 {
            return Err(ArchiveError::ServiceUnavailable(format!(
                "qdrant collection create failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let payload_points: Vec<_> = points
            .into_iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();
        let body = serde_json::json!({ "points": payload_points });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("qdrant: {e}")))?;
        if !response.status().is_success() {
            return Err(ArchiveError::ServiceUnavailable(format!(
                "qdrant upsert failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("qdrant: {e}")))?;
        if !response.status().is_success() {
            return Err(ArchiveError::ServiceUnavailable(format!(
                "qdrant search failed: {}",
                response.status()
            )));
        }
        #[derive(Deserialize)]
        struct SearchHit {
            id: serde_json::Value,
            score: f32,
            payload: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            result: Vec<SearchHit>,
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("qdrant response: {e}")))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|hit| VectorMatch {
                id: hit.id.as_str().map(String::from).unwrap_or_else(|| hit.id.to_string()),
                score: hit.score,
                payload: hit.payload,
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let body = serde_json::json!({ "points": ids });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("qdrant: {e}")))?;
        if !response.status().is_success() {
            return Err(ArchiveError::ServiceUnavailable(format!(
                "qdrant delete failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// In-memory cosine-similarity store for tests (grounded on the teacher's
/// own `ChunkDoc { text, embedding }` shape).
pub struct FakeVectorStore {
    points: tokio::sync::RwLock<Vec<VectorPoint>>,
}

impl FakeVectorStore {
    pub fn new() -> Self {
        Self {
            points: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for FakeVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut guard = self.points.write().await;
        for point in points {
            if let Some(existing) = guard.iter_mut().find(|p| p.id == point.id) {
                *existing = point;
            } else {
                guard.push(point);
            }
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let guard = self.points.read().await;
        let mut scored: Vec<VectorMatch> = guard
            .iter()
            .map(|p| VectorMatch {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.points.write().await;
        guard.retain(|p| !ids.contains(&p.id));
        Ok(())
    }
}
