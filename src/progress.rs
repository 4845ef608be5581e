//! ProgressTracker (C14, §4.11): per-file ingestion progress keyed by
//! session id, published over a broadcast channel alongside `ActivityLog`.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Result;

const PROGRESS_TTL_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Upload,
    Extract,
    Index,
    Enrich,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub stage: Stage,
    pub percent: f32,
    pub message: String,
}

pub struct ProgressTracker {
    conn: ConnectionManager,
    prefix: String,
    sender: broadcast::Sender<ProgressUpdate>,
}

impl ProgressTracker {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        let (sender, _receiver) = broadcast::channel(256);
        Ok(Self {
            conn,
            prefix: "archive:progress".to_string(),
            sender,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}:{session_id}", self.prefix)
    }

    async fn publish(&self, update: ProgressUpdate) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(&update.session_id);
        let payload = serde_json::to_string(&update)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(&key, &payload).ignore();
        pipe.expire(&key, PROGRESS_TTL_SECS).ignore();
        pipe.query_async::<()>(&mut conn).await?;

        if self.sender.send(update).is_err() {
            warn!("progress update has no subscribers");
        }
        Ok(())
    }

    pub async fn start(&self, session_id: &str, message: impl Into<String>) -> Result<()> {
        self.publish(ProgressUpdate {
            session_id: session_id.to_string(),
            stage: Stage::Upload,
            percent: 0.0,
            message: message.into(),
        })
        .await
    }

    pub async fn update(
        &self,
        session_id: &str,
        stage: Stage,
        percent: f32,
        message: impl Into<String>,
    ) -> Result<()> {
        self.publish(ProgressUpdate {
            session_id: session_id.to_string(),
            stage,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        })
        .await
    }

    pub async fn complete(&self, session_id: &str, message: impl Into<String>) -> Result<()> {
        self.publish(ProgressUpdate {
            session_id: session_id.to_string(),
            stage: Stage::Complete,
            percent: 100.0,
            message: message.into(),
        })
        .await
    }

    pub async fn error(&self, session_id: &str, message: impl Into<String>) -> Result<()> {
        self.publish(ProgressUpdate {
            session_id: session_id.to_string(),
            stage: Stage::Error,
            percent: 0.0,
            message: message.into(),
        })
        .await
    }

    /// Removes the session's progress row without emitting an event — used
    /// for the duplicate short-circuit, which must not surface a
    /// "completed" event (§4.6 step 3).
    pub async fn cleanup(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(session_id)).await?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<ProgressUpdate>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(session_id)).await?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }
}
