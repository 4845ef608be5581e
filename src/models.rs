//! Domain model (§3): documents, chunks, provenance, watched folders, tasks,
//! and activity events. Generalizes the teacher's `models.rs`, which carried
//! Neo4j-node shaped structs (`FileNode`/`DocumentNode`/`ChunkNode`) — those
//! are replaced here by the tracker/vault/BM25-agnostic shapes spec.md §3
//! describes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a `Document` (§3). Advances monotonically:
/// `processing -> {ready | failed}`, or short-circuits to `duplicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
    Duplicate,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Duplicate => "duplicate",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            "duplicate" => Ok(DocumentStatus::Duplicate),
            other => Err(anyhow::anyhow!("unknown document status: {other}")),
        }
    }
}

/// Duck-typed metadata field (§9 design note): the original mixes flat
/// string tags and nested shapes for the same field. We accept both on
/// input and always normalise to the nested form on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThemeValue {
    Flat(String),
    Nested {
        theme: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
}

impl ThemeValue {
    /// Project down to the bare tag, regardless of input shape.
    pub fn tag(&self) -> &str {
        match self {
            ThemeValue::Flat(s) => s,
            ThemeValue::Nested { theme, .. } => theme,
        }
    }

    /// Always write the nested form.
    pub fn normalize(self) -> ThemeValue {
        match self {
            ThemeValue::Flat(theme) => ThemeValue::Nested {
                theme,
                confidence: None,
            },
            nested => nested,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifications {
    pub theme: ThemeValue,
    pub primary_subtheme: Option<String>,
}

/// Append-only provenance entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub action: String,
    pub agent: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceEntry {
    pub fn new(action: impl Into<String>, agent: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            agent: agent.into(),
            tool: tool.into(),
            params: serde_json::Value::Null,
            result: None,
            timestamp: Utc::now(),
        }
    }
}

/// §3 `Document`: content-addressed by `file_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub file_hash: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub title: String,
    pub status: DocumentStatus,

    pub uploaded_at: DateTime<Utc>,
    pub file_created_at_disk: Option<DateTime<Utc>>,
    pub file_modified_at_disk: Option<DateTime<Utc>>,
    pub document_created_at: Option<DateTime<Utc>>,
    pub document_modified_at: Option<DateTime<Utc>>,
    pub content_date: Option<String>,

    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub content_dates: Vec<String>,
    #[serde(default)]
    pub provenance: Vec<ProvenanceEntry>,
    pub classifications: Option<Classifications>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Document {
    pub fn new(file_hash: String, mime_type: String, size_bytes: u64, title: String) -> Self {
        Self {
            document_id: Uuid::new_v4().to_string(),
            file_hash,
            mime_type,
            size_bytes,
            title,
            status: DocumentStatus::Processing,
            uploaded_at: Utc::now(),
            file_created_at_disk: None,
            file_modified_at_disk: None,
            document_created_at: None,
            document_modified_at: None,
            content_date: None,
            tags: HashSet::new(),
            content_dates: Vec::new(),
            provenance: Vec::new(),
            classifications: None,
            error_message: None,
        }
    }
}

/// §3 `Chunk` (node): immutable once written, deletion is by document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub node_id: String,
    pub document_id: String,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub prev_id: Option<String>,
    pub next_id: Option<String>,
    pub payload: ChunkPayload,
}

/// Minimal payload carried alongside each chunk so retrieval is
/// self-contained (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub title: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub theme: Option<String>,
    pub uploaded_date: DateTime<Utc>,
    pub file_hash_short: String,
}

/// §3 `WatchedFolder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderStatus {
    Stopped,
    Active,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderStats {
    pub detected: u64,
    pub ingested: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_processed: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedFolder {
    pub id: String,
    pub path: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub stats: FolderStats,
    pub status: FolderStatus,
}

impl WatchedFolder {
    pub fn new(path: String, enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            enabled,
            created_at: Utc::now(),
            stats: FolderStats::default(),
            status: FolderStatus::Stopped,
        }
    }
}

/// §3 enrichment `Task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: String,
    pub document_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    pub fn new(task_type: impl Into<String>, document_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            document_id: document_id.into(),
            data,
            priority: 0,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: default_max_retries(),
            last_retry_at: None,
        }
    }
}

/// §3 activity `Event`, ring-buffered to `MAX_EVENTS`.
pub const MAX_EVENTS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        let event_type = event_type.into();
        let now = Utc::now();
        let id = format!("{}_{}", now.timestamp_micros() as f64 / 1_000_000.0, event_type);
        Self {
            id,
            event_type,
            data,
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_value_accepts_both_shapes() {
        let flat: ThemeValue = serde_json::from_str("\"Financial\"").unwrap();
        assert_eq!(flat.tag(), "Financial");
        let nested: ThemeValue =
            serde_json::from_str(r#"{"theme":"Financial","confidence":0.9}"#).unwrap();
        assert_eq!(nested.tag(), "Financial");

        let normalized = flat.normalize();
        assert!(matches!(normalized, ThemeValue::Nested { .. }));
    }

    #[test]
    fn document_status_round_trips() {
        for s in ["processing", "ready", "failed", "duplicate"] {
            let status: DocumentStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
    }
}
