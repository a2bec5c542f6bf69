use serde::Serialize;
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::events::{DomainEvent, EventType};

/// Events recorded by one in-flight business operation.
///
/// Owned by the operation and passed down its call chain; never shared
/// between tasks. Only the coordinator can drain it.
#[derive(Debug)]
pub struct EventBuffer {
    correlation_id: CorrelationId,
    events: Vec<DomainEvent>,
}

impl EventBuffer {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            events: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Build an event carrying this buffer's correlation id and record it.
    pub fn record_body<B: Serialize>(
        &mut self,
        event_type: EventType,
        aggregate_id: Uuid,
        body: &B,
    ) -> Result<&DomainEvent, serde_json::Error> {
        let event = DomainEvent::from_body(event_type, aggregate_id, body, self.correlation_id)?;
        self.events.push(event);
        Ok(&self.events[self.events.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub(crate) fn into_events(self) -> Vec<DomainEvent> {
        self.events
    }
}
