use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scylla::client::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::events::DomainEvent;

// ============================================================================
// Dead Letter Storage
// ============================================================================
//
// Events that exhausted re-publication or consumer redelivery end up here for
// manual inspection. Records are append-only.
//
// ============================================================================

/// Which side of the broker gave up on the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterOrigin {
    Publisher,
    Consumer,
}

impl DeadLetterOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterOrigin::Publisher => "publisher",
            DeadLetterOrigin::Consumer => "consumer",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "consumer" => DeadLetterOrigin::Consumer,
            _ => DeadLetterOrigin::Publisher,
        }
    }
}

impl fmt::Display for DeadLetterOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    /// Nil when the payload could not be decoded into an event.
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub error_message: String,
    pub failure_count: i32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub origin: DeadLetterOrigin,
}

impl DeadLetterRecord {
    pub fn from_event(
        event: &DomainEvent,
        error_message: impl Into<String>,
        failure_count: u32,
        first_failed_at: DateTime<Utc>,
        origin: DeadLetterOrigin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.event_id(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().as_str().to_string(),
            payload: event.payload().to_string(),
            error_message: error_message.into(),
            failure_count: i32::try_from(failure_count).unwrap_or(i32::MAX),
            first_failed_at,
            last_failed_at: Utc::now(),
            origin,
        }
    }

    /// Record for bytes that never decoded into a DomainEvent.
    pub fn undecodable(topic: &str, payload: &[u8], error_message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id: Uuid::nil(),
            aggregate_id: Uuid::nil(),
            event_type: format!("undecodable:{}", topic),
            payload: String::from_utf8_lossy(payload).into_owned(),
            error_message: error_message.into(),
            failure_count: 1,
            first_failed_at: now,
            last_failed_at: now,
            origin: DeadLetterOrigin::Consumer,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DlqStats {
    pub total_messages: i64,
    pub by_event_type: HashMap<String, i64>,
}

/// Write side of the dead-letter path.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()>;
}

/// Dead-letter storage that can also be inspected.
#[async_trait]
pub trait DeadLetterStore: DeadLetterSink {
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<DeadLetterRecord>>;
    async fn stats(&self) -> anyhow::Result<DlqStats>;
}

#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterStore {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<DeadLetterRecord>> {
        Ok(self.records.lock().iter().take(limit).cloned().collect())
    }

    async fn stats(&self) -> anyhow::Result<DlqStats> {
        let records = self.records.lock();
        let mut by_event_type = HashMap::new();
        for record in records.iter() {
            *by_event_type.entry(record.event_type.clone()).or_insert(0) += 1;
        }
        Ok(DlqStats {
            total_messages: records.len() as i64,
            by_event_type,
        })
    }
}

/// ScyllaDB-backed store, table `dead_letter_queue`.
pub struct ScyllaDeadLetterStore {
    session: Arc<Session>,
}

impl ScyllaDeadLetterStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

type DeadLetterRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    String,
    String,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
    String,
);

#[async_trait]
impl DeadLetterSink for ScyllaDeadLetterStore {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        self.session
            .query_unpaged(
                "INSERT INTO dead_letter_queue (
                    id, event_id, aggregate_id, event_type, payload,
                    error_message, failure_count, first_failed_at,
                    last_failed_at, origin, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    record.id,
                    record.event_id,
                    record.aggregate_id,
                    &record.event_type,
                    &record.payload,
                    &record.error_message,
                    record.failure_count,
                    record.first_failed_at,
                    record.last_failed_at,
                    record.origin.as_str(),
                    Utc::now(),
                ),
            )
            .await?;

        tracing::info!(
            dlq_id = %record.id,
            event_id = %record.event_id,
            "Message successfully stored in DLQ"
        );
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for ScyllaDeadLetterStore {
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<DeadLetterRecord>> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let result = self
            .session
            .query_unpaged(
                "SELECT id, event_id, aggregate_id, event_type, payload, error_message,
                        failure_count, first_failed_at, last_failed_at, origin
                 FROM dead_letter_queue
                 LIMIT ?",
                (limit,),
            )
            .await?;

        let rows_result = result.into_rows_result()?;
        let mut records = Vec::new();
        for row in rows_result.rows::<DeadLetterRow>()? {
            let (
                id,
                event_id,
                aggregate_id,
                event_type,
                payload,
                error_message,
                failure_count,
                first_failed_at,
                last_failed_at,
                origin,
            ) = row?;

            records.push(DeadLetterRecord {
                id,
                event_id,
                aggregate_id,
                event_type,
                payload,
                error_message,
                failure_count,
                first_failed_at,
                last_failed_at,
                origin: DeadLetterOrigin::parse(&origin),
            });
        }

        Ok(records)
    }

    async fn stats(&self) -> anyhow::Result<DlqStats> {
        let result = self
            .session
            .query_unpaged("SELECT event_type FROM dead_letter_queue", &[])
            .await?;

        let rows_result = result.into_rows_result()?;
        let mut stats = DlqStats::default();
        for row in rows_result.rows::<(String,)>()? {
            let (event_type,) = row?;
            stats.total_messages += 1;
            *stats.by_event_type.entry(event_type).or_insert(0) += 1;
        }

        Ok(stats)
    }
}
