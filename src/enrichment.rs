//! EnrichmentWorker (C15, §4.12): dequeues background tasks from the work
//! queue and dispatches them by `task_type`.
//!
//! New module — the teacher has no background enrichment step. Grounded on
//! `queue.rs`'s dequeue/complete/retry contract and on `query.rs`'s
//! `Completion` trait for the LLM call. `date_extraction` is the only task
//! type with real logic; `auto_tagging` is a stub per the distilled
//! specification and only updates status.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{ArchiveError, Result};
use crate::llm::{Completion, CompletionRequest};
use crate::models::Task;
use crate::queue::WorkQueue;
use crate::tracker::{FullMetadata, Tracker, UpdateMode};

pub(crate) const DATE_EXTRACTION_MAX_CHARS: usize = 10_000;
const DATE_EXTRACTION_TEMPERATURE: f64 = 0.1;
const DATE_EXTRACTION_MAX_TOKENS: u64 = 1000;

const NO_DATE_PREFIXES: [&str; 4] = ["no date", "none", "not found", "unable"];

pub(crate) const DATE_EXTRACTION_SYSTEM_PROMPT: &str = "You extract the single most relevant date from a \
document's text. Respond with only the date in ISO-8601 (YYYY-MM-DD) form, or with \"no date \
found\" if the text contains no identifiable date. Do not add any other words.";

/// Shared by the tool surface's synchronous `date.extract` so the same
/// valid-date rule applies whether extraction runs via the work queue or on
/// demand.
pub(crate) fn looks_like_a_date(answer: &str) -> bool {
    let trimmed = answer.trim();
    let lowered = trimmed.to_lowercase();
    !trimmed.is_empty() && !NO_DATE_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix))
}

/// Consecutive dequeue errors tolerated before `run_until_shutdown` gives up
/// and returns, letting the binary's supervisor reconnect with a fresh
/// `WorkQueue`/`Tracker` pair.
const MAX_CONSECUTIVE_DEQUEUE_ERRORS: u32 = 5;

pub struct EnrichmentWorker {
    queue: Arc<WorkQueue>,
    tracker: Arc<dyn Tracker>,
    completion: Arc<dyn Completion>,
    date_extraction_timeout: std::time::Duration,
}

impl EnrichmentWorker {
    pub fn new(
        queue: Arc<WorkQueue>,
        tracker: Arc<dyn Tracker>,
        completion: Arc<dyn Completion>,
        date_extraction_timeout: std::time::Duration,
    ) -> Self {
        Self {
            queue,
            tracker,
            completion,
            date_extraction_timeout,
        }
    }

    /// Runs until `shutdown` flips to `true` or dequeue errors persist. A
    /// task already pulled off the queue is always finished (completed or
    /// requeued) before the shutdown flag is checked again, so a signal
    /// never drops a task mid-flight.
    pub async fn run_until_shutdown(&self, shutdown: Arc<std::sync::atomic::AtomicBool>) -> Result<()> {
        use std::sync::atomic::Ordering;

        let mut consecutive_errors = 0u32;
        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.dequeue().await {
                Ok(Some(task)) => {
                    consecutive_errors = 0;
                    self.process(task).await;
                }
                Ok(None) => {
                    consecutive_errors = 0;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(error = %err, consecutive_errors, "enrichment dequeue failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_DEQUEUE_ERRORS {
                        return Err(ArchiveError::ServiceUnavailable(
                            "enrichment worker exceeded consecutive dequeue errors".to_string(),
                        ));
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
        Ok(())
    }

    async fn process(&self, task: Task) {
        let task_type = task.task_type.clone();
        let document_id = task.document_id.clone();
        let result = match task_type.as_str() {
            "date_extraction" => self.date_extraction(&task).await,
            "auto_tagging" => self.auto_tagging(&task).await,
            other => Err(ArchiveError::Validation(format!(
                "unknown enrichment task type: {other}"
            ))),
        };

        match result {
            Ok(()) => {
                info!(task_type, document_id, "enrichment task completed");
                if let Err(err) = self.queue.mark_complete(&task).await {
                    warn!(error = %err, task_type, document_id, "failed to mark enrichment task complete");
                }
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(task_type, document_id, reason, "enrichment task failed");
                if let Err(err) = self.queue.requeue_with_retry(task, &reason).await {
                    warn!(error = %err, "failed to requeue enrichment task");
                }
            }
        }
    }

    async fn date_extraction(&self, task: &Task) -> Result<()> {
        let text = task
            .data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let truncated: String = text.chars().take(DATE_EXTRACTION_MAX_CHARS).collect();

        let request = CompletionRequest::new(
            DATE_EXTRACTION_SYSTEM_PROMPT,
            format!("Text:\n{truncated}"),
        )
        .with_temperature(DATE_EXTRACTION_TEMPERATURE)
        .with_max_tokens(DATE_EXTRACTION_MAX_TOKENS);

        let answer = tokio::time::timeout(self.date_extraction_timeout, self.completion.complete(request))
            .await
            .map_err(|_| ArchiveError::ServiceUnavailable("date extraction timed out".to_string()))??;

        let updates = date_extraction_updates(&answer);

        self.tracker
            .update_full_metadata(&task.document_id, &updates, UpdateMode::Update)
            .await
    }

    /// Stub per the distilled specification: no model call, status-only.
    async fn auto_tagging(&self, task: &Task) -> Result<()> {
        let mut updates = FullMetadata::new();
        updates.insert(
            "enrichment_status".to_string(),
            Value::String("auto_tagging_stub".to_string()),
        );
        self.tracker
            .update_full_metadata(&task.document_id, &updates, UpdateMode::Update)
            .await
    }
}

/// Pure helper behind `date_extraction`'s valid-date check and metadata
/// build, split out so it can be tested without a `Completion`/`Tracker`
/// pair wired up.
fn date_extraction_updates(answer: &str) -> FullMetadata {
    let trimmed = answer.trim();
    let mut updates = FullMetadata::new();
    if looks_like_a_date(answer) {
        updates.insert("content_date".to_string(), Value::String(trimmed.to_string()));
        updates.insert(
            "enrichment_status".to_string(),
            Value::String("dates_extracted".to_string()),
        );
    } else {
        updates.insert(
            "enrichment_status".to_string(),
            Value::String("no_dates_found".to_string()),
        );
    }
    updates
}
