//! Filter-operator and update-mode behavior not covered by `src/tracker.rs`'s
//! in-module unit tests (those cover plain equality and tag merging only).

use std::collections::HashMap;

use lifearch_core::tracker::{FilterSpec, JsonFileTracker, Tracker, UpdateMode};
use serde_json::Value;
use tempfile::tempdir;

fn meta(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn query_by_filters_applies_range_operators() {
    let dir = tempdir().unwrap();
    let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();

    tracker.add("old", &[]).await.unwrap();
    tracker
        .store_full_metadata("old", &meta(&[("size_bytes", Value::from(100))]))
        .await
        .unwrap();
    tracker.add("new", &[]).await.unwrap();
    tracker
        .store_full_metadata("new", &meta(&[("size_bytes", Value::from(5_000))]))
        .await
        .unwrap();

    let mut filters = HashMap::new();
    let mut ops = HashMap::new();
    ops.insert("$gte".to_string(), Value::from(1_000));
    filters.insert("size_bytes".to_string(), FilterSpec::Ops(ops));

    let matches = tracker.query_by_filters(&filters).await.unwrap();
    assert_eq!(matches, vec!["new".to_string()]);
}

#[tokio::test]
async fn query_by_filters_applies_in_operator() {
    let dir = tempdir().unwrap();
    let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();

    for (id, status) in [("a", "complete"), ("b", "pending"), ("c", "failed")] {
        tracker.add(id, &[]).await.unwrap();
        tracker
            .store_full_metadata(id, &meta(&[("status", Value::String(status.to_string()))]))
            .await
            .unwrap();
    }

    let mut filters = HashMap::new();
    let mut ops = HashMap::new();
    ops.insert(
        "$in".to_string(),
        Value::Array(vec![Value::String("complete".to_string()), Value::String("pending".to_string())]),
    );
    filters.insert("status".to_string(), FilterSpec::Ops(ops));

    let mut matches = tracker.query_by_filters(&filters).await.unwrap();
    matches.sort();
    assert_eq!(matches, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn update_mode_replace_overwrites_instead_of_merging_tags() {
    let dir = tempdir().unwrap();
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
            UpdateMode::Replace,
        )
        .await
        .unwrap();

    let metadata = tracker.get_full_metadata("doc1").await.unwrap().unwrap();
    let tags: Vec<String> = metadata["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tags, vec!["b".to_string()]);
}

#[tokio::test]
async fn clear_all_empties_the_store_and_reports_counts() {
    let dir = tempdir().unwrap();
    let tracker = JsonFileTracker::open(dir.path().join("tracker.json")).await.unwrap();
    tracker.add("doc1", &["n1".to_string()]).await.unwrap();
    tracker.add("doc2", &["n2".to_string()]).await.unwrap();

    let stats = tracker.clear_all().await.unwrap();
    assert!(stats.keys_deleted > 0);
    assert_eq!(tracker.count().await.unwrap(), 0);
    assert!(tracker.all_ids().await.unwrap().is_empty());
}
