use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::correlation::CorrelationId;

// ============================================================================
// Domain Event Record
// ============================================================================
//
// A DomainEvent is created once, after the aggregate accepted a command, and
// is never mutated afterwards. Fields are private and only readable through
// accessors; `event_id` is assigned at construction.
//
// ============================================================================

/// Topic that receives events which exhausted their delivery budget.
pub const DEAD_LETTER_TOPIC: &str = "order.dead-letter";

/// Kind of state change an event describes. Each kind has its own topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    OrderPaid,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::OrderCreated,
        EventType::OrderPaid,
        EventType::OrderShipped,
        EventType::OrderDelivered,
        EventType::OrderCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreated",
            EventType::OrderPaid => "OrderPaid",
            EventType::OrderShipped => "OrderShipped",
            EventType::OrderDelivered => "OrderDelivered",
            EventType::OrderCancelled => "OrderCancelled",
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderPaid => "order.paid",
            EventType::OrderShipped => "order.shipped",
            EventType::OrderDelivered => "order.delivered",
            EventType::OrderCancelled => "order.cancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every topic an order-event consumer subscribes to (dead-letter excluded).
pub fn all_topics() -> Vec<&'static str> {
    EventType::ALL.iter().map(EventType::topic).collect()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DomainEvent {
    event_id: Uuid,
    event_type: EventType,
    aggregate_id: Uuid,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    correlation_id: CorrelationId,
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        aggregate_id: Uuid,
        payload: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            // v7 ids sort by creation time, which keeps dedup tables append-friendly
            event_id: Uuid::now_v7(),
            event_type,
            aggregate_id,
            payload,
            occurred_at: Utc::now(),
            correlation_id,
        }
    }

    /// Build an event from any serializable body.
    pub fn from_body<B: Serialize>(
        event_type: EventType,
        aggregate_id: Uuid,
        body: &B,
        correlation_id: CorrelationId,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event_type,
            aggregate_id,
            serde_json::to_value(body)?,
            correlation_id,
        ))
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Broker partition key. All events of one order share it.
    pub fn partition_key(&self) -> String {
        self.aggregate_id.to_string()
    }

    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }

    /// Decode the body into a concrete type.
    pub fn body<B: DeserializeOwned>(&self) -> Result<B, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

// ============================================================================
// Wire Serialization Helpers
// ============================================================================

pub fn serialize_event(event: &DomainEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(event)
}

pub fn deserialize_event(bytes: &[u8]) -> Result<DomainEvent, serde_json::Error> {
    serde_json::from_slice(bytes)
}
