//! WorkQueue (C11, §4.9): Redis-backed FIFO with processing/completed/failed
//! lists and bounded retry. New module — the teacher has no queue — grounded
//! on the MULTI/EXEC idiom already established in `tracker.rs`/`bm25.rs` and
//! on the teacher's `connect_from_config` explicit-connect-and-log style.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::Task;

const COMPLETED_CAP: isize = 999;
const FAILED_CAP: isize = 999;
const DEQUEUE_TIMEOUT_SECS: f64 = 1.0;

pub struct WorkQueue {
    conn: ConnectionManager,
    prefix: String,
}

impl WorkQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!(redis_url, "connecting WorkQueue to Redis...");
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            prefix: "archive:queue".to_string(),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.prefix)
    }
    fn processing_key(&self) -> String {
        format!("{}:processing", self.prefix)
    }
    fn completed_key(&self) -> String {
        format!("{}:completed", self.prefix)
    }
    fn failed_key(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    pub async fn enqueue(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(task)?;
        let _: () = conn.lpush(self.queue_key(), payload).await?;
        Ok(())
    }

    /// Blocking dequeue: `BRPOPLPUSH queue -> processing` with a 1s timeout.
    /// Returns `None` on timeout (caller loops).
    pub async fn dequeue(&self) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .brpoplpush(self.queue_key(), self.processing_key(), DEQUEUE_TIMEOUT_SECS)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn mark_complete(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(task)?;
        let processing_time = (Utc::now() - task.enqueued_at).num_milliseconds();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(self.processing_key(), 1, &payload).ignore();
        pipe.lpush(self.completed_key(), &payload).ignore();
        pipe.ltrim(self.completed_key(), 0, COMPLETED_CAP).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        info!(task_type = %task.task_type, document_id = %task.document_id, processing_time, "task completed");
        Ok(())
    }

    /// Requeue on failure/timeout; moves to `failed` once `max_retries` is
    /// exceeded.
    pub async fn requeue_with_retry(&self, task: Task, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let old_payload = serde_json::to_string(&task)?;

        let mut retried = task;
        retried.retry_count += 1;
        retried.last_retry_at = Some(Utc::now());

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(self.processing_key(), 1, &old_payload).ignore();

        if retried.retry_count <= retried.max_retries {
            let new_payload = serde_json::to_string(&retried)?;
            pipe.lpush(self.queue_key(), new_payload).ignore();
            pipe.query_async::<()>(&mut conn).await?;
            warn!(
                task_type = %retried.task_type,
                document_id = %retried.document_id,
                retry_count = retried.retry_count,
                reason,
                "task requeued for retry"
            );
        } else {
            let failed_record = serde_json::json!({
                "task": retried,
                "reason": reason,
                "failed_at": Utc::now(),
            });
            let failed_payload = serde_json::to_string(&failed_record)?;
            pipe.lpush(self.failed_key(), failed_payload).ignore();
            pipe.ltrim(self.failed_key(), 0, FAILED_CAP).ignore();
            pipe.query_async::<()>(&mut conn).await?;
            warn!(
                task_type = %retried.task_type,
                document_id = %retried.document_id,
                reason,
                "task moved to failed queue after exceeding max_retries"
            );
        }
        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(self.queue_key()).await?)
    }

    pub async fn processing_depth(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(self.processing_key()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_serializes_with_expected_shape() {
        let task = Task::new("date_extraction", "doc1", serde_json::json!({"text": "hi"}));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "date_extraction");
        assert_eq!(json["document_id"], "doc1");
        assert_eq!(json["max_retries"], 3);
    }
}
