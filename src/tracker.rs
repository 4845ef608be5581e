//! DocumentTracker (C4, §4.3): authoritative document<->chunk map, full
//! metadata store, and filter indexes.
//!
//! `RedisTracker` grounds its connection setup on the teacher's
//! `neo4j_client::connect_from_config` (explicit `info!` on connect, a
//! `ConnectionManager` standing in for the teacher's long-lived `Graph`
//! handle) and its atomic writes on the teacher's transaction boundary in
//! `ingest.rs::upsert_graph_data`, re-expressed with `redis::pipe().atomic()`
//! instead of a Neo4j `Txn`. `JsonFileTracker` is the single-process
//! fallback spec.md names explicitly ("alternative JSON-file backend").

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{ArchiveError, Result};

pub type FullMetadata = HashMap<String, Value>;

const INDEXABLE_FIELDS: [&str; 4] = ["theme", "mime_type", "status", "file_hash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Update,
    Replace,
}

/// A single filter predicate: plain equality, or an operator map such as
/// `{"$gte": 5}` (§4.3).
#[derive(Debug, Clone)]
pub enum FilterSpec {
    Eq(Value),
    Ops(HashMap<String, Value>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearStats {
    pub keys_scanned: u64,
    pub keys_deleted: u64,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn add(&self, id: &str, node_ids: &[String]) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
    async fn store_full_metadata(&self, id: &str, metadata: &FullMetadata) -> Result<()>;
    async fn update_full_metadata(
        &self,
        id: &str,
        updates: &FullMetadata,
        mode: UpdateMode,
    ) -> Result<()>;
    async fn get_full_metadata(&self, id: &str) -> Result<Option<FullMetadata>>;
    async fn get_node_ids(&self, id: &str) -> Result<Vec<String>>;
    async fn document_exists(&self, id: &str) -> Result<bool>;
    async fn all_ids(&self) -> Result<Vec<String>>;
    async fn query_by_filters(&self, filters: &HashMap<String, FilterSpec>) -> Result<Vec<String>>;
    async fn clear_all(&self) -> Result<ClearStats>;
    async fn count(&self) -> Result<u64>;
}

fn list_field_values(metadata: &FullMetadata, field: &str) -> Vec<String> {
    match metadata.get(field) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(other) => vec![other.to_string()],
        None => Vec::new(),
    }
}

fn eval_eq(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        Some(v) => v == expected,
        None => false,
    }
}

fn eval_ops(value: Option<&Value>, ops: &HashMap<String, Value>) -> bool {
    let Some(value) = value else { return false };
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$gte" => compare(value, operand).map(|o| o.is_ge()).unwrap_or(false),
            "$lte" => compare(value, operand).map(|o| o.is_le()).unwrap_or(false),
            "$gt" => compare(value, operand).map(|o| o.is_gt()).unwrap_or(false),
            "$lt" => compare(value, operand).map(|o| o.is_lt()).unwrap_or(false),
            "$ne" => value != operand,
            "$in" => operand.as_array().is_some_and(|arr| arr.contains(value)),
            "$nin" => operand.as_array().is_some_and(|arr| !arr.contains(value)),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

pub fn matches_filters(metadata: &FullMetadata, filters: &HashMap<String, FilterSpec>) -> bool {
    filters.iter().all(|(field, spec)| {
        let value = metadata.get(field);
        match spec {
            FilterSpec::Eq(expected) => eval_eq(value, expected),
            FilterSpec::Ops(ops) => eval_ops(value, ops),
        }
    })
}

pub struct RedisTracker {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisTracker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!(redis_url, "connecting DocumentTracker to Redis...");
        let client = redis::Client::open(redis_url)
            .map_err(|e| ArchiveError::ServiceUnavailable(format!("redis client: {e}")))?;
        let conn = client.get_connection_manager().await?;
        info!("DocumentTracker Redis connection OK");
        Ok(Self {
            conn,
            prefix: "archive:doc".to_string(),
        })
    }

    fn nodes_key(&self, id: &str) -> String {
        format!("{}:nodes:{id}", self.prefix)
    }
    fn meta_key(&self, id: &str) -> String {
        format!("{}:meta:{id}", self.prefix)
    }
    fn all_key(&self) -> String {
        format!("{}:index:all", self.prefix)
    }
    fn count_key(&self) -> String {
        format!("{}:count", self.prefix)
    }
    fn filter_key(&self, field: &str, value: &str) -> String {
        format!("{}:index:{field}:{value}", self.prefix)
    }

    async fn read_metadata_hash(&self, id: &str) -> Result<Option<FullMetadata>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.meta_key(id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let mut metadata = FullMetadata::new();
        for (field, value) in raw {
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            metadata.insert(field, parsed);
        }
        Ok(Some(metadata))
    }
}

#[async_trait]
impl Tracker for RedisTracker {
    async fn add(&self, id: &str, node_ids: &[String]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !node_ids.is_empty() {
            pipe.rpush(self.nodes_key(id), node_ids).ignore();
        }
        pipe.sadd(self.all_key(), id).ignore();
        pipe.incr(self.count_key(), 1).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let existing = self.read_metadata_hash(id).await?;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.nodes_key(id)).ignore();
        pipe.del(self.meta_key(id)).ignore();
        pipe.srem(self.all_key(), id).ignore();
        pipe.decr(self.count_key(), 1).ignore();
        if let Some(metadata) = &existing {
            for field in INDEXABLE_FIELDS {
                for value in list_field_values(metadata, field) {
                    pipe.srem(self.filter_key(field, &value), id).ignore();
                }
            }
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn store_full_metadata(&self, id: &str, metadata: &FullMetadata) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        let key = self.meta_key(id);
        for (field, value) in metadata {
            let encoded = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pipe.hset(&key, field, encoded).ignore();
        }
        for field in INDEXABLE_FIELDS {
            for value in list_field_values(metadata, field) {
                pipe.sadd(self.filter_key(field, &value), id).ignore();
            }
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn update_full_metadata(
        &self,
        id: &str,
        updates: &FullMetadata,
        mode: UpdateMode,
    ) -> Result<()> {
        let previous = self.read_metadata_hash(id).await?.unwrap_or_default();
        let mut merged = previous.clone();

        for (field, value) in updates {
            match (mode, field.as_str(), value) {
                (UpdateMode::Update, "tags", Value::Array(new_tags)) => {
                    let mut set: HashSet<String> = merged
                        .get("tags")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default();
                    set.extend(new_tags.iter().filter_map(|v| v.as_str().map(String::from)));
                    let mut sorted: Vec<String> = set.into_iter().collect();
                    sorted.sort();
                    merged.insert(
                        "tags".to_string(),
                        Value::Array(sorted.into_iter().map(Value::String).collect()),
                    );
                }
                (UpdateMode::Update, "content_dates" | "provenance", Value::Array(new_items)) => {
                    let mut existing = merged
                        .get(field.as_str())
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    existing.extend(new_items.clone());
                    merged.insert(field.clone(), Value::Array(existing));
                }
                _ => {
                    merged.insert(field.clone(), value.clone());
                }
            }
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        let key = self.meta_key(id);
        for (field, value) in &merged {
            let encoded = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pipe.hset(&key, field, encoded).ignore();
        }

        for field in INDEXABLE_FIELDS {
            let old_values: HashSet<String> = list_field_values(&previous, field).into_iter().collect();
            let new_values: HashSet<String> = list_field_values(&merged, field).into_iter().collect();
            for removed in old_values.difference(&new_values) {
                pipe.srem(self.filter_key(field, removed), id).ignore();
            }
            for added in new_values.difference(&old_values) {
                pipe.sadd(self.filter_key(field, added), id).ignore();
            }
        }

        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get_full_metadata(&self, id: &str) -> Result<Option<FullMetadata>> {
        self.read_metadata_hash(id).await
    }

    async fn get_node_ids(&self, id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(self.nodes_key(id), 0, -1).await?;
        Ok(ids)
    }

    async fn document_exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.sismember(self.all_key(), id).await?;
        Ok(exists)
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.all_key()).await?;
        Ok(ids)
    }

    async fn query_by_filters(&self, filters: &HashMap<String, FilterSpec>) -> Result<Vec<String>> {
        if filters.is_empty() {
            return self.all_ids().await;
        }

        let eq_indexable: Vec<(&String, &Value)> = filters
            .iter()
            .filter_map(|(field, spec)| match spec {
                FilterSpec::Eq(v) if INDEXABLE_FIELDS.contains(&field.as_str()) => Some((field, v)),
                _ => None,
            })
            .collect();

        let mut candidates: Vec<String> = if eq_indexable.is_empty() {
            self.all_ids().await?
        } else {
            let mut conn = self.conn.clone();
            let keys: Vec<String> = eq_indexable
                .iter()
                .map(|(field, value)| {
                    let value_str = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    self.filter_key(field, &value_str)
                })
                .collect();
            if keys.len() == 1 {
                conn.smembers(&keys[0]).await?
            } else {
                conn.sinter(&keys).await?
            }
        };
        candidates.sort();

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates.drain(..) {
            if let Some(metadata) = self.read_metadata_hash(&id).await? {
                if matches_filters(&metadata, filters) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    async fn clear_all(&self) -> Result<ClearStats> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.prefix);
        let mut stats = ClearStats::default();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            stats.keys_scanned += keys.len() as u64;
            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                stats.keys_deleted += deleted;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(stats)
    }

    async fn count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.count_key()).await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
    }
}

/// Single-process JSON-file backend (§4.3: "Alternative JSON-file backend
/// ... semantics identical, performance O(n) for queries").
pub struct JsonFileTracker {
    path: PathBuf,
    state: Arc<RwLock<JsonState>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JsonState {
    nodes: HashMap<String, Vec<String>>,
    metadata: HashMap<String, FullMetadata>,
}

impl JsonFileTracker {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            JsonState::default()
        };
        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    async fn persist(&self, state: &JsonState) -> Result<()> {
        let raw = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl Tracker for JsonFileTracker {
    async fn add(&self, id: &str, node_ids: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.entry(id.to_string()).or_default().extend(node_ids.iter().cloned());
        self.persist(&state).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.remove(id);
        state.metadata.remove(id);
        self.persist(&state).await
    }

    async fn store_full_metadata(&self, id: &str, metadata: &FullMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        state.metadata.insert(id.to_string(), metadata.clone());
        self.persist(&state).await
    }

    async fn update_full_metadata(
        &self,
        id: &str,
        updates: &FullMetadata,
        mode: UpdateMode,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.metadata.entry(id.to_string()).or_default();
        for (field, value) in updates {
            match (mode, field.as_str(), value) {
                (UpdateMode::Update, "tags", Value::Array(new_tags)) => {
                    let mut set: HashSet<String> = entry
                        .get("tags")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default();
                    set.extend(new_tags.iter().filter_map(|v| v.as_str().map(String::from)));
                    let mut sorted: Vec<String> = set.into_iter().collect();
                    sorted.sort();
                    entry.insert(
                        "tags".to_string(),
                        Value::Array(sorted.into_iter().map(Value::String).collect()),
                    );
                }
                (UpdateMode::Update, "content_dates" | "provenance", Value::Array(new_items)) => {
                    let mut existing = entry.get(field.as_str()).and_then(|v| v.as_array()).cloned().unwrap_or_default();
                    existing.extend(new_items.clone());
                    entry.insert(field.clone(), Value::Array(existing));
                }
                _ => {
                    entry.insert(field.clone(), value.clone());
                }
            }
        }
        self.persist(&state).await
    }

    async fn get_full_metadata(&self, id: &str) -> Result<Option<FullMetadata>> {
        let state = self.state.read().await;
        Ok(state.metadata.get(id).cloned())
    }

    async fn get_node_ids(&self, id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.nodes.get(id).cloned().unwrap_or_default())
    }

    async fn document_exists(&self, id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.nodes.contains_key(id))
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.nodes.keys().cloned().collect())
    }

    async fn query_by_filters(&self, filters: &HashMap<String, FilterSpec>) -> Result<Vec<String>> {
        let state = self.state.read().await;
        if filters.is_empty() {
            return Ok(state.nodes.keys().cloned().collect());
        }
        Ok(state
            .metadata
            .iter()
            .filter(|(_, metadata)| matches_filters(metadata, filters))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn clear_all(&self) -> Result<ClearStats> {
        let mut state = self.state.write().await;
        let keys_scanned = (state.nodes.len() + state.metadata.len()) as u64;
        state.nodes.clear();
        state.metadata.clear();
        self.persist(&state).await?;
        Ok(ClearStats {
            keys_scanned,
            keys_deleted: keys_scanned,
        })
    }

    async fn count(&self) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.nodes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, Value)]) -> FullMetadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn json_tracker_round_trips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();

        tracker.add("doc1", &["n1".to_string(), "n2".to_string()]).await.unwrap();
        tracker
            .store_full_metadata("doc1", &meta(&[("theme", Value::String("Financial".into()))]))
            .await
            .unwrap();

        assert!(tracker.document_exists("doc1").await.unwrap());
        assert_eq!(tracker.get_node_ids("doc1").await.unwrap(), vec!["n1", "n2"]);

        let mut filters = HashMap::new();
        filters.insert("theme".to_string(), FilterSpec::Eq(Value::String("Financial".into())));
        let matches = tracker.query_by_filters(&filters).await.unwrap();
        assert_eq!(matches, vec!["doc1".to_string()]);
    }

    #[tokio::test]
    async fn json_tracker_update_merges_tags() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();
        tracker.add("doc1", &[]).await.unwrap();
        tracker
            .store_full_metadata("doc1", &meta(&[("tags", Value::Array(vec![Value::String("a".into())]))]))
            .await
            .unwrap();
        tracker
            .update_full_metadata(
                "doc1",
                &meta(&[("tags", Value::Array(vec![Value::String("b".into())]))]),
                UpdateMode::Update,
            )
            .await
            .unwrap();
        let metadata = tracker.get_full_metadata("doc1").await.unwrap().unwrap();
        let tags: Vec<String> = metadata["tags"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn remove_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();
        tracker.add("doc1", &["n1".to_string()]).await.unwrap();
        tracker.remove("doc1").await.unwrap();
        assert!(!tracker.document_exists("doc1").await.unwrap());
    }
}
