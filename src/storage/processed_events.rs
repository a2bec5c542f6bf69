use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scylla::client::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Processed Event Set
// ============================================================================
//
// Maps event_id -> processing timestamp for one consumer group. The consumer
// writes the mark after the side effect ran and before it acknowledges the
// broker, so a crash in between is absorbed by the dedup check on redelivery.
//
// Stores must accept concurrent writers: one consumer task per partition may
// mark events at the same time (never the same event_id, since one order's
// events all share a partition).
//
// ============================================================================

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, event_id: Uuid) -> anyhow::Result<bool>;

    async fn mark_processed(&self, event_id: Uuid, processed_at: DateTime<Utc>)
        -> anyhow::Result<()>;

    /// Whether marks survive a process restart.
    fn is_durable(&self) -> bool;
}

/// Process-local set, lost on restart. Meant for tests and in-process mode.
#[derive(Default)]
pub struct InMemoryProcessedEventStore {
    processed: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed_at(&self, event_id: Uuid) -> Option<DateTime<Utc>> {
        self.processed.lock().get(&event_id).copied()
    }

    pub fn len(&self) -> usize {
        self.processed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.lock().is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn is_processed(&self, event_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.processed.lock().contains_key(&event_id))
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        // First mark wins so the recorded timestamp is the original processing time
        self.processed.lock().entry(event_id).or_insert(processed_at);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// ScyllaDB-backed set, table `processed_events`.
pub struct ScyllaProcessedEventStore {
    session: Arc<Session>,
    consumer_group: String,
}

impl ScyllaProcessedEventStore {
    pub fn new(session: Arc<Session>, consumer_group: impl Into<String>) -> Self {
        Self {
            session,
            consumer_group: consumer_group.into(),
        }
    }
}

#[async_trait]
impl ProcessedEventStore for ScyllaProcessedEventStore {
    async fn is_processed(&self, event_id: Uuid) -> anyhow::Result<bool> {
        let result = self
            .session
            .query_unpaged(
                "SELECT processed_at FROM processed_events WHERE consumer_group = ? AND event_id = ?",
                (self.consumer_group.as_str(), event_id),
            )
            .await?;

        let rows = result.into_rows_result()?;
        Ok(rows.maybe_first_row::<(DateTime<Utc>,)>()?.is_some())
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.session
            .query_unpaged(
                "INSERT INTO processed_events (consumer_group, event_id, processed_at) \
                 VALUES (?, ?, ?) IF NOT EXISTS",
                (self.consumer_group.as_str(), event_id, processed_at),
            )
            .await?;

        tracing::debug!(
            event_id = %event_id,
            consumer_group = %self.consumer_group,
            "Processed mark stored in ScyllaDB"
        );
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
