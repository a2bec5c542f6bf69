use async_trait::async_trait;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::Actor;
use std::sync::Arc;

use crate::metrics::Metrics;
use crate::storage::{DeadLetterRecord, DeadLetterSink, DeadLetterStore, DlqStats};

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Single writer in front of the dead-letter store:
// - Persists events that exhausted re-publication or consumer redelivery
// - Serves listings and stats for manual intervention
// - Counts dead letters per event type
//
// Publisher and consumer reach it through `DlqHandle`, which implements
// `DeadLetterSink`.
//
// ============================================================================

pub struct DlqActor {
    store: Arc<dyn DeadLetterStore>,
    metrics: Arc<Metrics>,
}

impl DlqActor {
    pub fn new(store: Arc<dyn DeadLetterStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("DlqActor started - Dead Letter Queue ready");
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddToDlq {
    pub record: DeadLetterRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct GetDlqMessages {
    pub limit: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct GetDlqStats;

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = Result<(), String>;

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let record = msg.record;

        tracing::error!(
            event_id = %record.event_id,
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            origin = %record.origin,
            error = %record.error_message,
            failure_count = record.failure_count,
            "Adding message to Dead Letter Queue"
        );

        self.metrics.record_dlq_message(&record.event_type);

        self.store
            .dead_letter(record)
            .await
            .map_err(|e| format!("Failed to insert into DLQ: {}", e))
    }
}

impl Message<GetDlqMessages> for DlqActor {
    type Reply = Result<Vec<DeadLetterRecord>, String>;

    async fn handle(
        &mut self,
        msg: GetDlqMessages,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.store
            .list(msg.limit)
            .await
            .map_err(|e| format!("Failed to query DLQ: {}", e))
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = Result<DlqStats, String>;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.store
            .stats()
            .await
            .map_err(|e| format!("Failed to count DLQ messages: {}", e))
    }
}

/// `DeadLetterSink` that routes records through the DLQ actor.
#[derive(Clone)]
pub struct DlqHandle {
    actor: ActorRef<DlqActor>,
}

impl DlqHandle {
    pub fn new(actor: ActorRef<DlqActor>) -> Self {
        Self { actor }
    }

    pub async fn messages(&self, limit: usize) -> anyhow::Result<Vec<DeadLetterRecord>> {
        self.actor
            .ask(GetDlqMessages { limit })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("DLQ query failed: {:?}", e))
    }

    pub async fn stats(&self) -> anyhow::Result<DlqStats> {
        self.actor
            .ask(GetDlqStats)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("DLQ stats failed: {:?}", e))
    }
}

#[async_trait]
impl DeadLetterSink for DlqHandle {
    async fn dead_letter(&self, record: DeadLetterRecord) -> anyhow::Result<()> {
        self.actor
            .ask(AddToDlq { record })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("DLQ actor did not store record: {:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::events::{DomainEvent, EventType};
    use crate::storage::{DeadLetterOrigin, InMemoryDeadLetterStore};
    use chrono::Utc;
    use kameo::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(event_type: EventType) -> DeadLetterRecord {
        let event = DomainEvent::new(event_type, Uuid::new_v4(), json!({}), CorrelationId::new());
        DeadLetterRecord::from_event(&event, "broker unavailable", 5, Utc::now(), DeadLetterOrigin::Publisher)
    }

    #[tokio::test]
    async fn test_dlq_actor_stores_and_reports() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let actor = DlqActor::spawn(DlqActor::new(store.clone(), metrics.clone()));
        let handle = DlqHandle::new(actor);

        handle.dead_letter(record(EventType::OrderCreated)).await.unwrap();
        handle.dead_letter(record(EventType::OrderShipped)).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.by_event_type.get("OrderShipped"), Some(&1));

        let messages = handle.messages(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(store.records().len(), 2);
        assert_eq!(metrics.dlq_messages_total.get(), 2);
    }
}
