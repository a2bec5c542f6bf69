use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::BrokerError;
use crate::events::DEAD_LETTER_TOPIC;
use crate::storage::{DeadLetterRecord, DeadLetterSink};

// ============================================================================
// Broker Interfaces
// ============================================================================
//
// The broker is an external collaborator. This core only needs:
// - send(topic, partition_key, payload) -> ack or failure
// - a subscription yielding (payload, partition, offset) per consumer group,
//   with explicit ack (advance) and nack (redeliver)
//
// ============================================================================

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Returns once the broker acknowledged the record.
    async fn send(&self, topic: &str, partition_key: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// One record handed to a consumer group.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait DeliverySource: Send {
    /// Next record, or `None` when nothing is ready right now.
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError>;

    /// Mark the record consumed; it will not be delivered to this group again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject the record; the broker redelivers it.
    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// Dead-letter sink that forwards records to the dead-letter topic.
pub struct BrokerDeadLetterSink {
    producer: Arc<dyn BrokerProducer>,
}

impl BrokerDeadLetterSink {
    pub fn new(producer: Arc<dyn BrokerProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl DeadLetterSink for BrokerDeadLetterSink {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&record)?;
        self.producer
            .send(DEAD_LETTER_TOPIC, &record.aggregate_id.to_string(), &payload)
            .await?;

        tracing::warn!(
            event_id = %record.event_id,
            topic = DEAD_LETTER_TOPIC,
            "Forwarded event to dead-letter topic"
        );
        Ok(())
    }
}

/// Writes every record to each of its sinks.
///
/// Succeeds once at least one sink accepted the record; fails only when all
/// of them did. Callers treat success as "the record is stored somewhere",
/// so a partial failure must not make them write it again.
pub struct FanOutDeadLetterSink {
    sinks: Vec<Arc<dyn DeadLetterSink>>,
}

impl FanOutDeadLetterSink {
    pub fn new(sinks: Vec<Arc<dyn DeadLetterSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl DeadLetterSink for FanOutDeadLetterSink {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        let mut accepted = 0;
        let mut last_error = None;
        for sink in &self.sinks {
            match sink.dead_letter(record.clone()).await {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::error!(event_id = %record.event_id, error = %e, "Dead-letter sink failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if accepted == 0 => Err(e.context("no dead-letter sink accepted the record")),
            Some(_) => {
                tracing::warn!(
                    event_id = %record.event_id,
                    accepted = accepted,
                    sinks = self.sinks.len(),
                    "Dead-letter record stored by only some sinks"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryBroker;
    use crate::storage::{DeadLetterOrigin, InMemoryDeadLetterStore};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dead_letter_topic_receives_record() {
        let broker = InMemoryBroker::new(3);
        let sink = BrokerDeadLetterSink::new(Arc::new(broker.clone()));
        let record = DeadLetterRecord::undecodable("order.created", b"{", "eof");

        sink.dead_letter(record.clone()).await.unwrap();

        let stored = broker.payloads(DEAD_LETTER_TOPIC);
        assert_eq!(stored.len(), 1);
        let decoded: DeadLetterRecord = serde_json::from_slice(&stored[0]).unwrap();
        assert_eq!(decoded, record);
    }

    #[tokio::test]
    async fn test_fan_out_succeeds_when_any_sink_accepts() {
        let broker = InMemoryBroker::new(1);
        broker.set_available(false);
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let sink = FanOutDeadLetterSink::new(vec![
            Arc::new(BrokerDeadLetterSink::new(Arc::new(broker))),
            store.clone(),
        ]);

        let record = DeadLetterRecord {
            id: Uuid::new_v4(),
            event_id: Uuid::now_v7(),
            aggregate_id: Uuid::new_v4(),
            event_type: "OrderPaid".into(),
            payload: "{}".into(),
            error_message: "side effect failed".into(),
            failure_count: 5,
            first_failed_at: Utc::now(),
            last_failed_at: Utc::now(),
            origin: DeadLetterOrigin::Consumer,
        };

        assert!(sink.dead_letter(record).await.is_ok());
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_fails_only_when_no_sink_accepts() {
        let broker = InMemoryBroker::new(1);
        broker.set_available(false);
        let sink = FanOutDeadLetterSink::new(vec![Arc::new(BrokerDeadLetterSink::new(Arc::new(broker)))]);

        let record = DeadLetterRecord::undecodable("order.paid", b"??", "expected value");

        assert!(sink.dead_letter(record).await.is_err());
    }
}
