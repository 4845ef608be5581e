//! `WorkQueue` round-trips against a live Redis instance. `WorkQueue` has no
//! in-memory double (unlike `Tracker`/`ChunkStore`/`VectorStore`, which all
//! carry a fake for exactly this reason) since the queue's correctness is
//! its Redis list semantics (`BRPOPLPUSH`, atomic retry/requeue) — a fake
//! would just be reimplementing Redis. These are `#[ignore]`d by default;
//! run with `cargo test -- --ignored` against a Redis on `REDIS_URL`
//! (default `redis://127.0.0.1:6379`).

use lifearch_core::models::Task;
use lifearch_core::queue::WorkQueue;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[tokio::test]
#[ignore]
async fn enqueue_then_dequeue_round_trips_the_task() {
    let queue = WorkQueue::connect(&redis_url()).await.unwrap();
    let task = Task::new("date_extraction", "doc-queue-1", serde_json::json!({"text": "hello"}));
    queue.enqueue(&task).await.unwrap();

    let dequeued = queue.dequeue().await.unwrap().expect("task should be available");
    assert_eq!(dequeued.document_id, "doc-queue-1");
    assert_eq!(dequeued.task_type, "date_extraction");

    queue.mark_complete(&dequeued).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn requeue_with_retry_moves_to_failed_after_max_retries() {
    let queue = WorkQueue::connect(&redis_url()).await.unwrap();
    let mut task = Task::new("auto_tagging", "doc-queue-2", serde_json::json!({}));
    task.max_retries = 1;
    queue.enqueue(&task).await.unwrap();

    let dequeued = queue.dequeue().await.unwrap().unwrap();
    queue.requeue_with_retry(dequeued, "transient failure").await.unwrap();

    let retried = queue.dequeue().await.unwrap().expect("task should be requeued once");
    assert_eq!(retried.retry_count, 1);

    // Second failure exceeds max_retries (1) and should move to the failed
    // list instead of going back on the queue.
    queue.requeue_with_retry(retried, "still failing").await.unwrap();
    assert_eq!(queue.queue_depth().await.unwrap(), 0);
}
