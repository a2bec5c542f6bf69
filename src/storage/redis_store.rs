use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use super::ProcessedEventStore;

/// Redis-backed processed-event set.
///
/// Each mark is a key `processed:{group}:{event_id}` holding the processing
/// time, written with `SET NX EX` so it expires after the retention window.
pub struct RedisProcessedEventStore {
    connection: MultiplexedConnection,
    consumer_group: String,
    retention: Duration,
}

impl RedisProcessedEventStore {
    pub async fn connect(
        url: &str,
        consumer_group: impl Into<String>,
        retention: Duration,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let consumer_group = consumer_group.into();

        tracing::info!(
            consumer_group = %consumer_group,
            retention_secs = retention.as_secs(),
            "Connected processed-event store to Redis"
        );

        Ok(Self {
            connection,
            consumer_group,
            retention,
        })
    }

    fn key(&self, event_id: Uuid) -> String {
        format!("processed:{}:{}", self.consumer_group, event_id)
    }
}

#[async_trait]
impl ProcessedEventStore for RedisProcessedEventStore {
    async fn is_processed(&self, event_id: Uuid) -> anyhow::Result<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(self.key(event_id)).await?;
        Ok(exists)
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        let _: Option<String> = redis::cmd("SET")
            .arg(self.key(event_id))
            .arg(processed_at.to_rfc3339())
            .arg("NX")
            .arg("EX")
            .arg(self.retention.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
