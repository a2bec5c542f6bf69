use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use super::{EventPublisher, PublishOutcome, PublisherMode};
use crate::events::DomainEvent;

/// Receives events from the in-process publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Non-durable publisher: hands each event to every registered handler
/// before returning. Nothing is persisted, so events are lost on restart.
#[derive(Default)]
pub struct InProcessPublisher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl InProcessPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        tracing::info!(handler = %handler.name(), "Registered in-process event handler");
        self.handlers.write().push(handler);
    }
}

#[async_trait]
impl EventPublisher for InProcessPublisher {
    async fn publish(&self, event: &DomainEvent) -> PublishOutcome {
        let handlers = self.handlers.read().clone();
        let mut succeeded = 0;

        for handler in &handlers {
            match handler.handle(event).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(
                        handler = %handler.name(),
                        event_id = %event.event_id(),
                        correlation_id = %event.correlation_id(),
                        error = %e,
                        "In-process handler failed"
                    );
                }
            }
        }

        tracing::debug!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            correlation_id = %event.correlation_id(),
            handlers = succeeded,
            "Dispatched event in-process"
        );
        PublishOutcome::Dispatched { handlers: succeeded }
    }

    fn mode(&self) -> PublisherMode {
        PublisherMode::InProcess
    }
}
