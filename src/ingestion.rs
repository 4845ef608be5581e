//! IngestionPipeline (C8, §4.6): orchestrates C1–C7 for one file, from hash
//! to `ready`, with provenance and a documented failure policy.
//!
//! Grounds its per-file orchestration shape directly on the teacher's
//! `ingest.rs::ingest_file` (hash/extract/chunk/embed/persist in sequence,
//! returning a summary), but rewires the persistence target: the teacher's
//! single Neo4j `upsert_graph_data` transaction is replaced by the ordered
//! vector-store + BM25 + tracker writes the spec mandates, plus the
//! rollback-on-lost-chunks branch and the duplicate short-circuit the
//! teacher has no equivalent for.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::chunk::{split_into_chunks, ChunkStore};
use crate::error::{ArchiveError, Result};
use crate::extract::{extract_metadata, extract_text};
use crate::models::{ChunkPayload, DocumentStatus, Task};
use crate::progress::ProgressTracker;
use crate::queue::WorkQueue;
use crate::tracker::{FilterSpec, FullMetadata, Tracker, UpdateMode};
use crate::vault::Vault;
use crate::vector_store::{Embedder, VectorPoint, VectorStore};

const DATE_EXTRACTION_MIN_CHARS: usize = 50;
const AUTO_TAGGING_MIN_CHARS: usize = 100;

const RESERVED_METADATA_KEYS: [&str; 4] = ["document_id", "file_hash", "size_bytes", "uploaded_at"];

#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub mime_hint: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub session_id: Option<String>,
    /// Caller-supplied document id (§4.6 step 4: "caller-supplied or fresh
    /// UUIDv4"). Almost always left `None`.
    pub document_id: Option<String>,
}

impl IngestRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub file_id: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub deduped: bool,
}

pub struct IngestionPipeline {
    vault: std::sync::Arc<Vault>,
    tracker: std::sync::Arc<dyn Tracker>,
    bm25: std::sync::Arc<Bm25Index>,
    chunk_store: std::sync::Arc<dyn ChunkStore>,
    vector_store: std::sync::Arc<dyn VectorStore>,
    embedder: std::sync::Arc<dyn Embedder>,
    queue: std::sync::Arc<WorkQueue>,
    progress: std::sync::Arc<ProgressTracker>,
    enrichment_enabled: bool,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vault: std::sync::Arc<Vault>,
        tracker: std::sync::Arc<dyn Tracker>,
        bm25: std::sync::Arc<Bm25Index>,
        chunk_store: std::sync::Arc<dyn ChunkStore>,
        vector_store: std::sync::Arc<dyn VectorStore>,
        embedder: std::sync::Arc<dyn Embedder>,
        queue: std::sync::Arc<WorkQueue>,
        progress: std::sync::Arc<ProgressTracker>,
        enrichment_enabled: bool,
    ) -> Self {
        Self {
            vault,
            tracker,
            bm25,
            chunk_store,
            vector_store,
            embedder,
            queue,
            progress,
            enrichment_enabled,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        // Step 1: hash. Any failure here is pre-step-4 — no persistent state.
        let hash = Vault::hash_file(&request.path).await?;

        // Step 2: MIME resolution, hint overrides autodetection.
        let mime_type = request.mime_hint.clone().unwrap_or_else(|| {
            mime_guess::from_path(&request.path)
                .first_or_octet_stream()
                .to_string()
        });

        // Step 3: vault store + dedup short-circuit.
        let put_result = self.vault.put(&request.path, Some(hash.clone())).await?;
        if put_result.existed {
            let mut filters = HashMap::new();
            filters.insert("file_hash".to_string(), FilterSpec::Eq(Value::String(hash.clone())));
            let existing = self.tracker.query_by_filters(&filters).await?;
            if let Some(existing_id) = existing.into_iter().next() {
                if let Some(session_id) = &request.session_id {
                    // Cleaned without a "completed" event (§4.6 step 3).
                    self.progress.cleanup(session_id).await.ok();
                }
                return Ok(IngestResponse {
                    file_id: existing_id,
                    hash,
                    size: put_result.size,
                    mime_type,
                    status: DocumentStatus::Duplicate,
                    deduped: true,
                });
            }
        }

        // Step 4: allocate document id. Everything past this point that
        // fails must leave a `failed` document row, per §4.6's failure
        // policy.
        let document_id = request.document_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(session_id) = &request.session_id {
            self.progress.start(session_id, "uploading file").await.ok();
        }

        match self
            .ingest_body(&request, &document_id, &hash, &mime_type, &put_result)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) => {
                self.fail_document(&document_id, &hash, &mime_type, put_result.size, &request, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn ingest_body(
        &self,
        request: &IngestRequest,
        document_id: &str,
        hash: &str,
        mime_type: &str,
        put_result: &crate::vault::PutResult,
    ) -> Result<IngestResponse> {
        // Step 5: text + format metadata.
        let extracted = extract_text(&request.path, mime_type).await;
        let format_metadata = extract_metadata(&request.path, mime_type).await;

        let stat = tokio::fs::metadata(&request.path).await?;
        let title = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| request.path.to_string_lossy().to_string());
        let uploaded_at = Utc::now();

        // Step 6: build full metadata. Reserved keys are pipeline-owned and
        // never overwritten by caller-supplied metadata.
        let mut metadata = FullMetadata::new();
        metadata.insert("document_id".to_string(), Value::String(document_id.to_string()));
        metadata.insert("file_hash".to_string(), Value::String(hash.to_string()));
        metadata.insert("size_bytes".to_string(), Value::from(put_result.size));
        metadata.insert("uploaded_at".to_string(), Value::String(uploaded_at.to_rfc3339()));
        metadata.insert("mime_type".to_string(), Value::String(mime_type.to_string()));
        metadata.insert("title".to_string(), Value::String(title.clone()));
        metadata.insert(
            "file_created_at_disk".to_string(),
            system_time_value(stat.created().ok()),
        );
        metadata.insert(
            "file_modified_at_disk".to_string(),
            system_time_value(stat.modified().ok()),
        );
        for (field, value) in format_metadata {
            metadata.insert(field, value);
        }
        for (field, value) in &request.metadata {
            if RESERVED_METADATA_KEYS.contains(&field.as_str()) {
                continue;
            }
            metadata.insert(field.clone(), value.clone());
        }
        if !request.tags.is_empty() {
            metadata.insert(
                "tags".to_string(),
                Value::Array(request.tags.iter().cloned().map(Value::String).collect()),
            );
        }
        metadata.insert("status".to_string(), Value::String(DocumentStatus::Processing.as_str().to_string()));

        // Step 7: chunk, then index into vector store, BM25, and tracker in
        // that order.
        let payload = ChunkPayload {
            document_id: document_id.to_string(),
            title,
            mime_type: mime_type.to_string(),
            status: DocumentStatus::Processing,
            theme: None,
            uploaded_date: uploaded_at,
            file_hash_short: hash.chars().take(12).collect(),
        };
        let chunks = split_into_chunks(document_id, &extracted.text, payload);
        let node_ids: Vec<String> = chunks.iter().map(|c| c.node_id.clone()).collect();

        self.chunk_store.put_many(&chunks).await?;

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            let points = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| {
                    let mut payload = serde_json::to_value(&chunk.payload).unwrap_or(Value::Null);
                    if let Value::Object(map) = &mut payload {
                        map.insert("text".to_string(), Value::String(chunk.text.clone()));
                        map.insert("node_id".to_string(), Value::String(chunk.node_id.clone()));
                        map.insert("start_char".to_string(), Value::from(chunk.start_char));
                        map.insert("end_char".to_string(), Value::from(chunk.end_char));
                    }
                    VectorPoint {
                        id: chunk.node_id.clone(),
                        vector,
                        payload,
                    }
                })
                .collect();
            self.vector_store.upsert(points).await?;
            self.bm25.add(document_id, &extracted.text).await?;
        }
        self.tracker.add(document_id, &node_ids).await?;

        if !chunks.is_empty() {
            let registered = self.tracker.get_node_ids(document_id).await?;
            if registered.is_empty() {
                warn!(document_id, "vector store indexed chunks but tracker lost them, rolling back");
                self.vector_store.delete(&node_ids).await.ok();
                self.bm25.remove(document_id).await.ok();
                self.tracker.remove(document_id).await.ok();
                self.chunk_store.delete(&node_ids).await.ok();
                if !put_result.existed {
                    self.vault.delete(hash).await.ok();
                }
                return Err(ArchiveError::Internal(anyhow::anyhow!(
                    "chunk registration lost after vector insert for {document_id}"
                )));
            }
        }

        // Step 8: ready + provenance.
        metadata.insert("status".to_string(), Value::String(DocumentStatus::Ready.as_str().to_string()));
        let provenance = crate::models::ProvenanceEntry::new("import", "system", "ingestion_pipeline");
        metadata.insert(
            "provenance".to_string(),
            Value::Array(vec![serde_json::to_value(&provenance).unwrap_or(Value::Null)]),
        );
        self.tracker.store_full_metadata(document_id, &metadata).await?;

        // Step 9: conditional enrichment enqueue, non-blocking.
        let char_count = extracted.text.chars().count();
        if char_count >= DATE_EXTRACTION_MIN_CHARS {
            let task = Task::new("date_extraction", document_id, serde_json::json!({"text": extracted.text}));
            if let Err(e) = self.queue.enqueue(&task).await {
                warn!(document_id, error = %e, "failed to enqueue date_extraction task");
            }
        }
        if char_count >= AUTO_TAGGING_MIN_CHARS && self.enrichment_enabled {
            let task = Task::new("auto_tagging", document_id, serde_json::json!({"text": extracted.text}));
            if let Err(e) = self.queue.enqueue(&task).await {
                warn!(document_id, error = %e, "failed to enqueue auto_tagging task");
            }
        }

        // Step 10.
        if let Some(session_id) = &request.session_id {
            self.progress.complete(session_id, "ingestion complete").await.ok();
        }

        Ok(IngestResponse {
            file_id: document_id.to_string(),
            hash: hash.to_string(),
            size: put_result.size,
            mime_type: mime_type.to_string(),
            status: DocumentStatus::Ready,
            deduped: false,
        })
    }

    /// Failure policy past step 4: write `status=failed` with
    /// `error_message`, emit an `error` progress event; never panics on a
    /// secondary failure while recording the first one.
    async fn fail_document(
        &self,
        document_id: &str,
        hash: &str,
        mime_type: &str,
        size: u64,
        request: &IngestRequest,
        error: &ArchiveError,
    ) {
        if !self.tracker.document_exists(document_id).await.unwrap_or(false) {
            self.tracker.add(document_id, &[]).await.ok();
        }
        let mut metadata = FullMetadata::new();
        metadata.insert("document_id".to_string(), Value::String(document_id.to_string()));
        metadata.insert("file_hash".to_string(), Value::String(hash.to_string()));
        metadata.insert("mime_type".to_string(), Value::String(mime_type.to_string()));
        metadata.insert("size_bytes".to_string(), Value::from(size));
        metadata.insert("status".to_string(), Value::String(DocumentStatus::Failed.as_str().to_string()));
        metadata.insert("error_message".to_string(), Value::String(error.to_string()));
        if self
            .tracker
            .update_full_metadata(document_id, &metadata, UpdateMode::Update)
            .await
            .is_err()
        {
            warn!(document_id, "failed to persist failure metadata after ingestion error");
        }
        if let Some(session_id) = &request.session_id {
            self.progress.error(session_id, format!("ingestion failed: {error}")).await.ok();
        }
    }
}

fn system_time_value(time: Option<std::time::SystemTime>) -> Value {
    match time.map(DateTime::<Utc>::from) {
        Some(dt) => Value::String(dt.to_rfc3339()),
        None => Value::Null,
    }
}
