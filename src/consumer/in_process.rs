use async_trait::async_trait;
use std::sync::Arc;

use super::idempotent::{ConsumerDecision, IdempotentConsumer};
use crate::events::DomainEvent;
use crate::messaging::EventHandler;

/// Runs the idempotent consumer as an in-process handler, so the non-durable
/// publisher goes through the same dedup and notification path.
///
/// A nack is answered by invoking the consumer again on the spot, which ends
/// once the consumer acks or dead-letters the event.
pub struct InProcessConsumer {
    consumer: Arc<IdempotentConsumer>,
}

impl InProcessConsumer {
    pub fn new(consumer: Arc<IdempotentConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl EventHandler for InProcessConsumer {
    fn name(&self) -> &str {
        "idempotent-consumer"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let rounds = self.consumer.config().max_failed_deliveries.max(1);
        for _ in 0..rounds {
            if let ConsumerDecision::Ack(_) = self.consumer.on_event(event).await {
                return Ok(());
            }
        }
        anyhow::bail!(
            "event {} still unacknowledged after {} in-process deliveries",
            event.event_id(),
            rounds
        )
    }
}
