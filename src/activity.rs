//! ActivityLog (C13, §4.11): capped event feed persisted to Redis with
//! broadcast fan-out. New module; grounded on the Redis transaction idiom
//! established in `tracker.rs` plus the teacher's `tokio::sync` usage for
//! in-process notification (the teacher has no broadcast channel, but its
//! `Arc<Mutex<Status>>` single-writer/many-reader shape is the closest
//! analogue generalized here to a proper pub/sub primitive).

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Result;
use crate::models::{Event, MAX_EVENTS};

pub struct ActivityLog {
    conn: ConnectionManager,
    key: String,
    sender: broadcast::Sender<Event>,
}

impl ActivityLog {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        let (sender, _receiver) = broadcast::channel(256);
        Ok(Self {
            conn,
            key: "archive:activity:events".to_string(),
            sender,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Persists first, broadcasts second; broadcast failures never block or
    /// fail persistence (§7: "Activity-event write failures never
    /// propagate" applies to the reverse direction too — a write always
    /// completes even with zero subscribers).
    pub async fn add(&self, event_type: impl Into<String>, data: serde_json::Value) -> Result<Event> {
        let event = Event::new(event_type, data);
        let payload = serde_json::to_string(&event)?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(&self.key, &payload).ignore();
        pipe.ltrim(&self.key, 0, MAX_EVENTS as isize - 1).ignore();
        pipe.query_async::<()>(&mut conn).await?;

        if self.sender.send(event.clone()).is_err() {
            warn!(event_type = %event.event_type, "activity event has no subscribers");
        }
        Ok(event)
    }

    pub async fn get_recent(&self, limit: usize) -> Result<Vec<Event>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&self.key, 0, limit.max(1) as isize - 1).await?;
        Ok(raw
            .into_iter()
            .filter_map(|r| serde_json::from_str(&r).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_namespaced_by_type() {
        let event = Event::new("folder_watch_file_ingested", serde_json::json!({"path": "a.txt"}));
        assert!(event.id.ends_with("_folder_watch_file_ingested"));
    }
}
