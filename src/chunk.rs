//! ChunkStore + chunking policy (C7, §4.5): sliding-window splitter with
//! soft `\n\n` boundaries, overlap, and neighbour pointers.
//!
//! Generalizes the teacher's `ingest.rs::split_into_chunks` (a naive
//! fixed-1200-char paragraph splitter with no overlap) into the spec's
//! windowed splitter; chunk ids keep the teacher's `Uuid::new_v4()` pattern.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Chunk, ChunkPayload};

pub const TARGET_CHUNK_SIZE: usize = 2600;
pub const CHUNK_OVERLAP: usize = 200;
const BOUNDARY: &str = "\n\n";

struct Span {
    start: usize,
    end: usize,
}

/// Splits `text` into contiguous, possibly-overlapping windows, preferring
/// to end a window at a `\n\n` boundary near the target size. Order within
/// the document is preserved. Empty text yields zero spans (§4.6 step 7:
/// "zero chunks is valid").
fn split_spans(text: &str, target: usize, overlap: usize) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + target).min(len);
        if end < len {
            // Search backward from `end` for a soft boundary within the
            // back half of the window, so we don't truncate mid-sentence.
            let search_floor = start + target / 2;
            if let Some(boundary_at) = rfind_boundary(&chars, search_floor, end) {
                end = boundary_at;
            }
        }
        if end <= start {
            end = (start + target).min(len);
        }
        spans.push(Span { start, end });
        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    spans
}

fn rfind_boundary(chars: &[char], floor: usize, ceiling: usize) -> Option<usize> {
    let boundary_chars: Vec<char> = BOUNDARY.chars().collect();
    let blen = boundary_chars.len();
    if ceiling < blen {
        return None;
    }
    let mut i = ceiling.saturating_sub(blen);
    while i >= floor {
        if chars[i..i + blen] == boundary_chars[..] {
            return Some(i + blen);
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    None
}

/// Builds the ordered `Chunk` list for one document, assigning `node_id`s
/// and linking `prev_id`/`next_id` neighbour pointers.
pub fn split_into_chunks(document_id: &str, text: &str, payload: ChunkPayload) -> Vec<Chunk> {
    split_into_chunks_with_params(document_id, text, payload, TARGET_CHUNK_SIZE, CHUNK_OVERLAP)
}

pub fn split_into_chunks_with_params(
    document_id: &str,
    text: &str,
    payload: ChunkPayload,
    target: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let spans = split_spans(text, target, overlap);
    if spans.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let node_ids: Vec<String> = spans.iter().map(|_| Uuid::new_v4().to_string()).collect();

    spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| Chunk {
            node_id: node_ids[i].clone(),
            document_id: document_id.to_string(),
            text: chars[span.start..span.end].iter().collect(),
            start_char: span.start,
            end_char: span.end,
            prev_id: if i == 0 { None } else { Some(node_ids[i - 1].clone()) },
            next_id: node_ids.get(i + 1).cloned(),
            payload: payload.clone(),
        })
        .collect()
}

/// Chunk persistence keyed by `node_id` (C7: "payload carrier"). Chunk text
/// is also mirrored into the vector-store payload (§4.5: "retrieval is
/// self-contained"), but the tracker/search layer still needs a
/// document-agnostic lookup by `node_id` — e.g. to seed neighbour
/// discovery from a document's first chunk without round-tripping through
/// the vector store.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn put_many(&self, chunks: &[Chunk]) -> Result<()>;
    async fn get(&self, node_id: &str) -> Result<Option<Chunk>>;
    async fn delete(&self, node_ids: &[String]) -> Result<()>;
}

/// Redis-backed store, grounded on the same `redis::pipe().atomic()` idiom
/// as `tracker.rs`/`queue.rs`.
pub struct RedisChunkStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisChunkStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            prefix: "archive:chunk".to_string(),
        })
    }

    fn key(&self, node_id: &str) -> String {
        format!("{}:{node_id}", self.prefix)
    }
}

#[async_trait]
impl ChunkStore for RedisChunkStore {
    async fn put_many(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for chunk in chunks {
            let payload = serde_json::to_string(chunk)?;
            pipe.set(self.key(&chunk.node_id), payload).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, node_id: &str) -> Result<Option<Chunk>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(node_id)).await?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    async fn delete(&self, node_ids: &[String]) -> Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = node_ids.iter().map(|id| self.key(id)).collect();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn put_many(&self, chunks: &[Chunk]) -> Result<()> {
        let mut guard = self.chunks.write().await;
        for chunk in chunks {
            guard.insert(chunk.node_id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn get(&self, node_id: &str) -> Result<Option<Chunk>> {
        Ok(self.chunks.read().await.get(node_id).cloned())
    }

    async fn delete(&self, node_ids: &[String]) -> Result<()> {
        let mut guard = self.chunks.write().await;
        for id in node_ids {
            guard.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;
    use chrono::Utc;

    fn payload() -> ChunkPayload {
        ChunkPayload {
            document_id: "doc1".to_string(),
            title: "t".to_string(),
            mime_type: "text/plain".to_string(),
            status: DocumentStatus::Processing,
            theme: None,
            uploaded_date: Utc::now(),
            file_hash_short: "abcdef".to_string(),
        }
    }

    #[test]
    fn empty_text_yields_zero_chunks() {
        let chunks = split_into_chunks("doc1", "", payload());
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk_with_no_neighbours() {
        let chunks = split_into_chunks("doc1", "hello world", payload());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].prev_id.is_none());
        assert!(chunks[0].next_id.is_none());
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn long_text_overlaps_and_links_neighbours() {
        let paragraph = "word ".repeat(100); // ~500 chars
        let text = std::iter::repeat(paragraph)
            .take(12)
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_into_chunks_with_params("doc1", &text, payload(), 2600, 200);
        assert!(chunks.len() > 1);
        for i in 0..chunks.len() - 1 {
            assert_eq!(chunks[i].next_id.as_deref(), Some(chunks[i + 1].node_id.as_str()));
            assert_eq!(chunks[i + 1].prev_id.as_deref(), Some(chunks[i].node_id.as_str()));
        }
        // Overlap: next chunk's start is before previous chunk's end.
        for i in 0..chunks.len() - 1 {
            assert!(chunks[i + 1].start_char < chunks[i].end_char);
        }
    }

    #[test]
    fn chunks_preserve_document_order() {
        let text = "A".repeat(6000);
        let chunks = split_into_chunks_with_params("doc1", &text, payload(), 2600, 200);
        for i in 0..chunks.len() - 1 {
            assert!(chunks[i].start_char < chunks[i + 1].start_char);
        }
    }

    #[tokio::test]
    async fn in_memory_chunk_store_round_trips() {
        let store = InMemoryChunkStore::new();
        let chunks = split_into_chunks("doc1", "hello world", payload());
        store.put_many(&chunks).await.unwrap();

        let fetched = store.get(&chunks[0].node_id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "hello world");

        store.delete(&[chunks[0].node_id.clone()]).await.unwrap();
        assert!(store.get(&chunks[0].node_id).await.unwrap().is_none());
    }
}
